use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether a failure may be retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Transient,
    Fatal,
}

/// Errors raised by a provider adapter, either when opening a completion
/// stream or while it is being consumed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ProviderError {
    // Fatal
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("context window exceeded: {actual} > {limit}")]
    ContextWindowExceeded { limit: usize, actual: usize },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    // Transient
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A transient failure that outlived the retry budget.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<ProviderError> },
}

impl ProviderError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::RateLimited { .. }
            | Self::ServerError { .. }
            | Self::Network(_)
            | Self::StreamInterrupted(_)
            | Self::Timeout(_) => Severity::Transient,
            Self::AuthenticationFailed(_)
            | Self::ContextWindowExceeded { .. }
            | Self::InvalidRequest(_)
            | Self::Unavailable(_)
            | Self::RetriesExhausted { .. } => Severity::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.severity() == Severity::Transient
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::ContextWindowExceeded { .. } => "context_window_exceeded",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unavailable(_) => "unavailable",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Network(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Timeout(_) => "timeout",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    /// Promote a transient error to fatal once no more attempts are allowed.
    pub fn escalate(self, attempts: u32) -> Self {
        if self.is_transient() {
            Self::RetriesExhausted {
                attempts,
                last: Box::new(self),
            }
        } else {
            self
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

/// Structured cause attached to `error` events and errored sessions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCause {
    /// Taxonomy name, e.g. `ProviderError`, `ToolInfrastructureError`,
    /// `SequenceConflict`, `Cancelled`, `TurnLimitExceeded`.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub message: String,
}

impl ErrorCause {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            severity: None,
            message: message.into(),
        }
    }

    pub fn provider(error: &ProviderError) -> Self {
        Self {
            kind: "ProviderError".into(),
            severity: Some(error.severity()),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.severity {
            Some(Severity::Fatal) => write!(f, "{}{{fatal}}: {}", self.kind, self.message),
            Some(Severity::Transient) => write!(f, "{}{{transient}}: {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}
