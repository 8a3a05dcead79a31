use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::messages::HistoryEntry;
use crate::schema::ToolSchema;
use crate::stream::DeltaStream;

/// Everything a provider sees for one round.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub history: Vec<HistoryEntry>,
    pub tools: Vec<ToolSchema>,
    pub project_root: PathBuf,
}

/// Trait implemented by each provider adapter. The orchestrator only ever
/// talks to this trait.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str {
        self.name()
    }

    /// Open a streamed completion. Errors returned here happen before any
    /// delta; errors yielded by the stream happen mid-round.
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<DeltaStream, ProviderError>;
}
