use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tern_llm::RetryPolicy;

use crate::truncate::DEFAULT_MAX_OUTPUT;

/// Orchestrator limits and switches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Provider rounds allowed per turn.
    pub max_rounds: u32,
    /// Concurrency budget for the tool calls of one round.
    pub tool_concurrency: u32,
    #[serde(with = "duration_ms")]
    pub tool_timeout: Duration,
    /// Bounds the completion call and the wait for each next delta.
    #[serde(with = "duration_ms")]
    pub provider_timeout: Duration,
    pub retry: RetryPolicy,
    /// Queue depth per bus subscriber before it is disconnected.
    pub subscriber_capacity: usize,
    pub max_tool_output_bytes: usize,
    /// Log every provider delta at debug level.
    pub trace_deltas: bool,
    /// Environment handed to tool handlers.
    pub tool_env: HashMap<String, String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: 50,
            tool_concurrency: 8,
            tool_timeout: Duration::from_secs(120),
            provider_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            subscriber_capacity: 1024,
            max_tool_output_bytes: DEFAULT_MAX_OUTPUT,
            trace_deltas: false,
            tool_env: HashMap::new(),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
