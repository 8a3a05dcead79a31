use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorCause;
use crate::ids::{MessageId, SessionId, ToolCallId};
use crate::messages::{FinishReason, Part, PartPayload, Role, ToolErrorInfo};

/// Payload of `message.part.delta`: either a transient text fragment or the
/// committed text part assembled from the fragments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartDelta {
    Text { text: String },
    Committed { part: Part },
}

/// Events fanned out to live subscribers of a session. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "session.created")]
    SessionCreated {
        session_id: SessionId,
        project_root: PathBuf,
    },

    #[serde(rename = "message.created")]
    MessageCreated {
        session_id: SessionId,
        message_id: MessageId,
        role: Role,
        index: u32,
    },

    #[serde(rename = "message.part.delta")]
    MessagePartDelta {
        session_id: SessionId,
        message_id: MessageId,
        delta: PartDelta,
    },

    #[serde(rename = "message.completed")]
    MessageCompleted {
        session_id: SessionId,
        message_id: MessageId,
        reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },

    #[serde(rename = "tool.call")]
    ToolCall {
        session_id: SessionId,
        message_id: MessageId,
        sequence: u32,
        call_id: ToolCallId,
        name: String,
        arguments: serde_json::Value,
    },

    #[serde(rename = "tool.delta")]
    ToolDelta {
        session_id: SessionId,
        message_id: MessageId,
        call_id: ToolCallId,
        arguments_delta: String,
    },

    #[serde(rename = "tool.result")]
    ToolResult {
        session_id: SessionId,
        message_id: MessageId,
        sequence: u32,
        call_id: ToolCallId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ToolErrorInfo>,
    },

    #[serde(rename = "error")]
    Error {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        cause: ErrorCause,
    },

    #[serde(rename = "heartbeat")]
    Heartbeat {
        session_id: SessionId,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::SessionCreated { session_id, .. }
            | Self::MessageCreated { session_id, .. }
            | Self::MessagePartDelta { session_id, .. }
            | Self::MessageCompleted { session_id, .. }
            | Self::ToolCall { session_id, .. }
            | Self::ToolDelta { session_id, .. }
            | Self::ToolResult { session_id, .. }
            | Self::Error { session_id, .. }
            | Self::Heartbeat { session_id, .. } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session.created",
            Self::MessageCreated { .. } => "message.created",
            Self::MessagePartDelta { .. } => "message.part.delta",
            Self::MessageCompleted { .. } => "message.completed",
            Self::ToolCall { .. } => "tool.call",
            Self::ToolDelta { .. } => "tool.delta",
            Self::ToolResult { .. } => "tool.result",
            Self::Error { .. } => "error",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn heartbeat(session_id: SessionId) -> Self {
        Self::Heartbeat {
            session_id,
            at: Utc::now(),
        }
    }

    /// Event announcing a persisted non-terminal part. Terminal parts are
    /// announced by `message.completed` or `error`, which carry more than
    /// the part itself.
    pub fn for_part(session_id: &SessionId, part: &Part) -> Option<Self> {
        let session_id = session_id.clone();
        let message_id = part.message_id.clone();
        match &part.payload {
            PartPayload::Text { .. } => Some(Self::MessagePartDelta {
                session_id,
                message_id,
                delta: PartDelta::Committed { part: part.clone() },
            }),
            PartPayload::ToolCall {
                call_id,
                name,
                arguments,
            } => Some(Self::ToolCall {
                session_id,
                message_id,
                sequence: part.sequence,
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            PartPayload::ToolResult {
                call_id,
                success,
                output,
                error,
            } => Some(Self::ToolResult {
                session_id,
                message_id,
                sequence: part.sequence,
                call_id: call_id.clone(),
                success: *success,
                output: output.clone(),
                error: error.clone(),
            }),
            PartPayload::Finish { .. } | PartPayload::Aborted { .. } => None,
        }
    }
}
