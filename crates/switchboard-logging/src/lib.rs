//! # switchboard-logging
//!
//! Structured logging with `tracing`.
//!
//! One call at startup installs a global subscriber: an `EnvFilter`
//! (`RUST_LOG` wins over the configured level) feeding either a
//! human-readable or a JSON `fmt` layer. Per-module overrides use the usual
//! `target=level` directive syntax.

#![deny(unsafe_code)]

use switchboard_settings::{LogLevel, LoggingSettings};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Per-module overrides, e.g. `("switchboard_broker", LogLevel::Debug)`.
    pub module_levels: Vec<(String, LogLevel)>,
    /// Emit JSON lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl From<&LoggingSettings> for LoggingConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            level: settings.level,
            module_levels: Vec::new(),
            json: settings.json,
        }
    }
}

/// Build the filter directive string for a config.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut filter = config.level.as_filter_str().to_string();
    for (module, level) in &config.module_levels {
        filter.push_str(&format!(",{module}={}", level.as_filter_str()));
    }
    filter
}

/// Install the global subscriber. Call once at startup.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let directives = filter_directives(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
}
