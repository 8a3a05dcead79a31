use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the HTTP server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind; `0` picks a free port.
    pub port: u16,
    /// Seconds between `heartbeat` frames on an idle event stream.
    pub heartbeat_interval_secs: u64,
    /// Upper bound on producing a response. Streaming bodies are not affected.
    pub request_timeout_secs: u64,
    /// How long shutdown waits for open connections to drain.
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
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
