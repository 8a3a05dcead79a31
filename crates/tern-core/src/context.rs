use std::collections::HashMap;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::ids::{SessionId, ToolCallId};

/// Context handed to a tool handler. Handlers never see the bus or the store.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub call_id: ToolCallId,
    pub project_root: PathBuf,
    pub working_directory: PathBuf,
    pub env: HashMap<String, String>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(session_id: SessionId, call_id: ToolCallId, project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            session_id,
            call_id,
            working_directory: project_root.clone(),
            project_root,
            env: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Resolve a user-supplied path against the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_directory.join(p)
        }
    }
}
