//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_broker::BrokerConfig;
use switchboard_settings::SwitchboardSettings;

/// Configuration for the switchboard server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Interval between keepalive comment frames, in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Per-connection outbound queue capacity.
    pub queue_capacity: usize,
    /// Number of retained events available for resume.
    pub backlog_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            keepalive_interval_ms: 15_000,
            queue_capacity: 64,
            backlog_capacity: 512,
        }
    }
}

impl ServerConfig {
    /// Keepalive period as a `Duration`.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms.max(1))
    }

    /// Limits handed to the broker.
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            backlog_capacity: self.backlog_capacity,
            queue_capacity: self.queue_capacity,
        }
    }
}

impl From<&SwitchboardSettings> for ServerConfig {
    fn from(settings: &SwitchboardSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            keepalive_interval_ms: settings.stream.keepalive_interval_ms,
            queue_capacity: settings.stream.queue_capacity,
            backlog_capacity: settings.stream.backlog_capacity,
        }
    }
}
