//! Settings types. Serialized camelCase; every field has a default so a
//! partial file deserializes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TernSettings {
    pub server: ServerSettings,
    pub orchestrator: OrchestratorSettings,
    pub provider: ProviderSettings,
    pub telemetry: TelemetrySettings,
    /// SQLite database for sessions and messages. `:memory:` keeps nothing.
    pub database_path: String,
}

impl Default for TernSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            provider: ProviderSettings::default(),
            telemetry: TelemetrySettings::default(),
            database_path: crate::loader::tern_dir().join("tern.db").display().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9091,
            heartbeat_interval_secs: 15,
            request_timeout_secs: 30,
            shutdown_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorSettings {
    /// Provider rounds allowed per user turn.
    pub max_rounds: u32,
    /// Tool invocations running at once within a round.
    pub tool_concurrency: u32,
    pub tool_timeout_ms: u64,
    /// Bounds opening a completion and the wait for each delta.
    pub provider_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Queued events per subscriber before it is disconnected.
    pub subscriber_capacity: usize,
    pub max_tool_output_bytes: usize,
    /// Log every provider delta at debug level.
    pub trace_deltas: bool,
    /// Extra environment handed to tools.
    pub tool_env: BTreeMap<String, String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_rounds: 50,
            tool_concurrency: 8,
            tool_timeout_ms: 120_000,
            provider_timeout_ms: 60_000,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            subscriber_capacity: 1024,
            max_tool_output_bytes: 256 * 1024,
            trace_deltas: false,
            tool_env: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderSettings {
    /// Adapter name known to the provider factory, e.g. `echo` or `scripted`.
    pub name: String,
    /// Script file for the `scripted` adapter.
    pub script_path: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: "echo".into(),
            script_path: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetrySettings {
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,
    /// Per-module levels, e.g. `{"tern_engine": "debug"}`.
    pub modules: BTreeMap<String, String>,
    pub format: LogFormat,
    /// Persist warn+ records to SQLite.
    pub persist_logs: bool,
    pub log_db_path: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            modules: BTreeMap::new(),
            format: LogFormat::Json,
            persist_logs: true,
            log_db_path: crate::loader::tern_dir().join("logs.db").display().to_string(),
        }
    }
}
