use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use tern_engine::EngineError;
use tern_store::StoreError;

/// Error body: `{ "error": { "code": "SESSION_BUSY", "message": "..." } }`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// An HTTP error response with a stable string code.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_PARAMS", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::not_found(format!("not found: {what}")),
            other => {
                error!(error = %other, "store failure");
                Self::internal(other.to_string())
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::SessionNotFound(id) => {
                Self::new(StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", format!("session {id} not found"))
            }
            EngineError::SessionTerminal { session_id, status } => Self::new(
                StatusCode::CONFLICT,
                "SESSION_TERMINAL",
                format!("session {session_id} is {status}"),
            ),
            EngineError::SessionBusy(id) => Self::new(
                StatusCode::CONFLICT,
                "SESSION_BUSY",
                format!("session {id} already has a turn in progress"),
            ),
            EngineError::Store(store) => store.into(),
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
