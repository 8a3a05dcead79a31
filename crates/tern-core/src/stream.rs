use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::ids::ToolCallId;

/// Incremental output of one provider round. Ordering contract:
///
/// (TextDelta* | ToolCallDelta* → ToolCallComplete)* → TurnEnd
///
/// A stream that ends without `TurnEnd` is treated as interrupted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderDelta {
    TextDelta {
        text: String,
    },
    ToolCallDelta {
        call_id: ToolCallId,
        arguments_delta: String,
    },
    ToolCallComplete {
        #[serde(default)]
        call_id: ToolCallId,
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    TurnEnd,
}

impl ProviderDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::ToolCallComplete {
            call_id: ToolCallId::new(),
            name: name.into(),
            arguments,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TurnEnd)
    }
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ProviderDelta, ProviderError>> + Send>>;
