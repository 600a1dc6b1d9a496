//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use switchboard_core::Sequence;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open event streams.
    pub connections: usize,
    /// Last sequence number handed out by the broker.
    pub last_event_id: Sequence,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, last_event_id: Sequence) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        last_event_id,
    }
}
