//! `/health` endpoint.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered WebSocket connections.
    pub connections: usize,
    /// One-time tokens issued but not yet used or swept.
    pub pending_tokens: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, pending_tokens: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        pending_tokens,
    }
}
