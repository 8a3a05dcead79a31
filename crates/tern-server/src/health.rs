use std::time::Instant;

use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    /// Turns currently in flight.
    pub running_turns: usize,
    pub tools: usize,
}

pub fn health_check(start_time: Instant, running_turns: usize, tools: usize) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        running_turns,
        tools,
    }
}
