use tern_core::errors::{ErrorCause, ProviderError};
use tern_core::ids::SessionId;
use tern_core::session::SessionStatus;
use tern_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tool infrastructure failure in {tool}: {message}")]
    ToolInfrastructure { tool: String, message: String },

    #[error("turn cancelled")]
    Cancelled,

    #[error("turn exceeded {0} provider rounds")]
    TurnLimitExceeded(u32),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session {session_id} is {status}")]
    SessionTerminal {
        session_id: SessionId,
        status: SessionStatus,
    },

    #[error("session {0} already has a turn in flight")]
    SessionBusy(SessionId),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Structured cause recorded on the session and carried by the `error` event.
    pub fn cause(&self) -> ErrorCause {
        match self {
            Self::Provider(e) => ErrorCause::provider(e),
            Self::Store(e) => ErrorCause::new(e.error_kind(), self.to_string()),
            Self::ToolInfrastructure { .. } => ErrorCause::new("ToolInfrastructureError", self.to_string()),
            Self::Cancelled => ErrorCause::new("Cancelled", self.to_string()),
            Self::TurnLimitExceeded(_) => ErrorCause::new("TurnLimitExceeded", self.to_string()),
            Self::SessionNotFound(_) => ErrorCause::new("SessionNotFound", self.to_string()),
            Self::SessionTerminal { .. } => ErrorCause::new("SessionTerminal", self.to_string()),
            Self::SessionBusy(_) => ErrorCause::new("SessionBusy", self.to_string()),
            Self::Internal(_) => ErrorCause::new("Internal", self.to_string()),
        }
    }

    /// Errors raised before a turn touches any state.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_) | Self::SessionTerminal { .. } | Self::SessionBusy(_)
        )
    }
}
