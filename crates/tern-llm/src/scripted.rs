use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::debug;

use tern_core::errors::ProviderError;
use tern_core::provider::{CompletionRequest, ProviderAdapter};
use tern_core::stream::{DeltaStream, ProviderDelta};

use crate::factory::FactoryError;

/// On-disk script: one entry per provider round.
///
/// ```json
/// {
///   "rounds": [
///     [{"type": "tool_call_complete", "name": "pwd"}, {"type": "turn_end"}],
///     [{"type": "text_delta", "text": "done"}, {"type": "turn_end"}]
///   ],
///   "delta_delay_ms": 20
/// }
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Script {
    pub rounds: Vec<Vec<ProviderDelta>>,
    #[serde(default)]
    pub delta_delay_ms: u64,
}

/// Replays a fixed script of rounds, one per `stream_completion` call.
pub struct ScriptedProvider {
    script: Script,
    next_round: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            next_round: AtomicUsize::new(0),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, FactoryError> {
        let script: Script =
            serde_json::from_str(json).map_err(|e| FactoryError::InvalidScript(e.to_string()))?;
        Ok(Self::new(script))
    }

    pub fn from_path(path: &Path) -> Result<Self, FactoryError> {
        let json = std::fs::read_to_string(path).map_err(|e| FactoryError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&json)
    }

    pub fn rounds_played(&self) -> usize {
        self.next_round.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<DeltaStream, ProviderError> {
        let round = self.next_round.fetch_add(1, Ordering::Relaxed);
        let Some(deltas) = self.script.rounds.get(round).cloned() else {
            return Err(ProviderError::Unavailable(format!(
                "script exhausted after {} rounds",
                self.script.rounds.len()
            )));
        };
        debug!(round, history_len = request.history.len(), deltas = deltas.len(), "replaying script round");

        let items = stream::iter(deltas.into_iter().map(Ok));
        if self.script.delta_delay_ms == 0 {
            return Ok(Box::pin(items));
        }
        let pause = Duration::from_millis(self.script.delta_delay_ms);
        Ok(Box::pin(items.then(move |item| async move {
            tokio::time::sleep(pause).await;
            item
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SCRIPT: &str = r#"{
        "rounds": [
            [{"type": "tool_call_complete", "call_id": "call_1", "name": "pwd", "arguments": {}}, {"type": "turn_end"}],
            [{"type": "text_delta", "text": "all "}, {"type": "text_delta", "text": "done"}, {"type": "turn_end"}]
        ]
    }"#;

    fn request() -> CompletionRequest {
        CompletionRequest {
            history: Vec::new(),
            tools: Vec::new(),
            project_root: PathBuf::from("/tmp"),
        }
    }

    #[tokio::test]
    async fn replays_rounds_in_order() {
        let provider = ScriptedProvider::from_json(SCRIPT).unwrap();

        let first: Vec<_> = provider.stream_completion(&request()).await.unwrap().collect().await;
        assert!(matches!(&first[0], Ok(ProviderDelta::ToolCallComplete { name, .. }) if name == "pwd"));

        let second: Vec<_> = provider.stream_completion(&request()).await.unwrap().collect().await;
        assert_eq!(second.len(), 3);
        assert_eq!(provider.rounds_played(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_is_fatal() {
        let provider = ScriptedProvider::new(Script::default());
        let err = provider.stream_completion(&request()).await.err().unwrap();
        assert!(!err.is_transient());
    }

    #[test]
    fn rejects_malformed_script() {
        let err = ScriptedProvider::from_json(r#"{"rounds": [[{"type": "bogus"}]]}"#).err().unwrap();
        assert!(matches!(err, FactoryError::InvalidScript(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        std::fs::write(&path, SCRIPT).unwrap();
        let provider = ScriptedProvider::from_path(&path).unwrap();
        assert_eq!(provider.script.rounds.len(), 2);

        let missing = ScriptedProvider::from_path(&dir.path().join("nope.json")).err().unwrap();
        assert!(matches!(missing, FactoryError::Io { .. }));
    }

    #[tokio::test]
    async fn paced_script_still_yields_everything() {
        let provider = ScriptedProvider::new(Script {
            rounds: vec![vec![ProviderDelta::text("a"), ProviderDelta::TurnEnd]],
            delta_delay_ms: 5,
        });
        let deltas: Vec<_> = provider.stream_completion(&request()).await.unwrap().collect().await;
        assert_eq!(deltas.len(), 2);
    }
}
