use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ToolContext;
use crate::schema::ToolSchema;

/// Tools declare whether they can run in parallel with others.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Safe to run in parallel (read_file, glob, list_files).
    Concurrent,
    /// Must run alone (write_file and other filesystem mutations).
    Sequential,
}

/// Side effects a tool asks the orchestrator to apply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSignal {
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<ToolSignal>,
}

impl ToolOutput {
    pub fn ok(output: impl Into<serde_json::Value>) -> Self {
        Self {
            success: true,
            output: output.into(),
            signal: None,
        }
    }

    /// A handled failure the model should see, e.g. "file not found".
    pub fn failed(output: impl Into<serde_json::Value>) -> Self {
        Self {
            success: false,
            output: output.into(),
            signal: None,
        }
    }

    pub fn with_signal(mut self, signal: ToolSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> ToolSchema;

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Concurrent
    }

    /// Same arguments against the same state always give the same output.
    fn idempotent(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    /// The environment the tool depends on is broken; ends the turn.
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl ToolError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        Self::Execution(e.to_string())
    }
}

/// Deserialize validated arguments into a typed input struct.
pub fn parse_args<T: serde::de::DeserializeOwned>(args: serde_json::Value) -> Result<T, ToolError> {
    let args = if args.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
