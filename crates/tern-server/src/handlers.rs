//! HTTP handlers for sessions, turns and event streams.

use std::convert::Infallible;
use std::path::PathBuf;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use tern_core::ids::SessionId;
use tern_core::messages::HistoryEntry;
use tern_core::session::{Session, SessionStatus};
use tern_engine::{EngineError, TurnPhase};

use crate::error::ApiError;
use crate::health::{self, HealthResponse};
use crate::server::AppState;
use crate::sse;

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct CreateSession {
    pub project_root: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTurn {
    pub input: String,
}

/// A session together with the orchestrator's live view of it.
#[derive(Debug, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub phase: TurnPhase,
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub sessions: Vec<Session>,
}

#[derive(Debug, Serialize)]
pub struct MessageList {
    pub messages: Vec<HistoryEntry>,
}

async fn load_session(state: &AppState, id: &SessionId) -> Result<Session, ApiError> {
    state.orchestrator.store().get_session(id).await.map_err(|e| match e {
        tern_store::StoreError::NotFound(_) => EngineError::SessionNotFound(id.clone()).into(),
        other => other.into(),
    })
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let orch = &state.orchestrator;
    Json(health::health_check(state.start_time, orch.running_count(), orch.registry().count()))
}

/// POST /sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSession>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    if body.project_root.as_os_str().is_empty() || !body.project_root.is_absolute() {
        return Err(ApiError::invalid_params("project_root must be an absolute path"));
    }
    let session = state.orchestrator.create_session(&body.project_root).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<SessionList>, ApiError> {
    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => Some(
            SessionStatus::parse(raw).ok_or_else(|| ApiError::invalid_params(format!("unknown status: {raw}")))?,
        ),
    };
    let limit = params.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let sessions = state
        .orchestrator
        .store()
        .list_sessions(status, limit, params.offset.unwrap_or(0))
        .await?;
    Ok(Json(SessionList { sessions }))
}

/// GET /sessions/{id}
pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SessionView>, ApiError> {
    let id = SessionId::from_raw(id);
    let session = load_session(&state, &id).await?;
    Ok(Json(SessionView {
        phase: state.orchestrator.state(&id),
        running: state.orchestrator.is_running(&id),
        session,
    }))
}

/// DELETE /sessions/{id}
pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let id = SessionId::from_raw(id);
    load_session(&state, &id).await?;
    state.orchestrator.delete_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /sessions/{id}/messages
pub async fn list_messages(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<MessageList>, ApiError> {
    let id = SessionId::from_raw(id);
    load_session(&state, &id).await?;
    let messages = state.orchestrator.store().history(&id).await?;
    Ok(Json(MessageList { messages }))
}

/// POST /sessions/{id}/turns
///
/// Rejections are answered synchronously; the turn itself runs in the
/// background and reports through the session's event stream.
pub async fn submit_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SubmitTurn>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SessionId::from_raw(id);
    if body.input.trim().is_empty() {
        return Err(ApiError::invalid_params("input must not be empty"));
    }
    let session = load_session(&state, &id).await?;
    if session.status.is_terminal() {
        return Err(EngineError::SessionTerminal {
            session_id: id,
            status: session.status,
        }
        .into());
    }
    let claim = state.orchestrator.claim_turn(&id)?;

    let orch = state.orchestrator.clone();
    tokio::spawn(async move {
        let session_id = claim.session_id().clone();
        // failed turns are recorded and logged by the orchestrator
        if let Err(e) = orch.run_claimed(claim, &body.input).await {
            if e.is_rejection() {
                warn!(session_id = %session_id, error = %e, "background turn rejected");
            }
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "session_id": id, "accepted": true }))))
}

/// POST /sessions/{id}/cancel
pub async fn cancel_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = SessionId::from_raw(id);
    load_session(&state, &id).await?;
    let cancelled = state.orchestrator.cancel(&id);
    Ok(Json(json!({ "cancelled": cancelled })))
}

/// GET /sessions/{id}/events
pub async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let id = SessionId::from_raw(id);
    load_session(&state, &id).await?;
    info!(session_id = %id, "event stream opened");

    let events = state.orchestrator.subscribe(&id);
    let frames = sse::with_heartbeat(events, id, state.heartbeat_interval, state.shutdown.clone()).filter_map(
        |event| async move {
            match sse::to_frame(&event) {
                Ok(frame) => Some(Ok(frame)),
                Err(e) => {
                    warn!(event = event.event_type(), error = %e, "failed to encode event");
                    None
                }
            }
        },
    );
    Ok(Sse::new(frames))
}
