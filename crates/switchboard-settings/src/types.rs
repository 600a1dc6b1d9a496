//! Settings type definitions.
//!
//! All types use camelCase JSON keys and `#[serde(default)]`, so a settings
//! file only needs the fields it overrides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "stream": { "backlogCapacity": 1024 },
///   "auth": { "tokens": { "secret-token": "user-1" } }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Network binding.
    pub server: ServerSettings,
    /// Stream, queue and backlog tuning.
    pub stream: StreamSettings,
    /// Bearer credentials accepted by the static verifier.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for SwitchboardSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "switchboard".to_string(),
            server: ServerSettings::default(),
            stream: StreamSettings::default(),
            auth: AuthSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl SwitchboardSettings {
    /// Reject values the broker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.stream.backlog_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "stream.backlogCapacity must be greater than zero".into(),
            ));
        }
        if self.stream.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "stream.queueCapacity must be greater than zero".into(),
            ));
        }
        if self.stream.keepalive_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "stream.keepaliveIntervalMs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP port (`0` to auto-assign).
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8700,
        }
    }
}

/// Event stream settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Interval between keepalive comment frames, in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Per-connection outbound queue capacity.
    pub queue_capacity: usize,
    /// Number of recent events kept for resume.
    pub backlog_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: 15_000,
            queue_capacity: 64,
            backlog_capacity: 512,
        }
    }
}

/// Static bearer-token table: token -> identity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Accepted tokens and the identity each resolves to.
    pub tokens: BTreeMap<String, String>,
}

/// Log level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug output.
    Debug,
    /// Default.
    #[default]
    Info,
    /// Warnings and errors.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}
