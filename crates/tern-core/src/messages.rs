use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, PartId, SessionId, ToolCallId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One message of a session. `index` is the 1-based position within the
/// session, assigned by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub index: u32,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The provider ended its turn without requesting tools.
    EndTurn,
    /// The round requested tools; a continuation message follows.
    ToolUse,
    /// The finish tool was called; the session is done.
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    Cancelled,
    Error,
}

/// Error detail carried by a failed `tool_result` part.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolErrorInfo {
    pub kind: String,
    pub message: String,
}

/// Typed payload of a message part. The tag doubles as the part's `kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartPayload {
    Text {
        text: String,
    },
    ToolCall {
        call_id: ToolCallId,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        call_id: ToolCallId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ToolErrorInfo>,
    },
    Finish {
        reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Aborted {
        reason: AbortReason,
        detail: String,
    },
}

impl PartPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Finish { .. } => "finish",
            Self::Aborted { .. } => "aborted",
        }
    }

    /// Terminal parts seal their message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Aborted { .. })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_failure(call_id: ToolCallId, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolResult {
            call_id,
            success: false,
            output: None,
            error: Some(ToolErrorInfo {
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,
    pub message_id: MessageId,
    pub sequence: u32,
    pub payload: PartPayload,
    pub created_at: DateTime<Utc>,
}

/// A message together with its parts in sequence order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub message: Message,
    pub parts: Vec<Part>,
}

impl HistoryEntry {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match &p.payload {
                PartPayload::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn is_sealed(&self) -> bool {
        self.parts.last().is_some_and(|p| p.payload.is_terminal())
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&ToolCallId, &str, &serde_json::Value)> {
        self.parts.iter().filter_map(|p| match &p.payload {
            PartPayload::ToolCall {
                call_id,
                name,
                arguments,
            } => Some((call_id, name.as_str(), arguments)),
            _ => None,
        })
    }
}
