//! # switchboard
//!
//! Server binary: loads settings, initializes logging and metrics, and serves
//! the event stream until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use switchboard_logging::LoggingConfig;
use switchboard_server::config::ServerConfig;
use switchboard_server::server::SwitchboardServer;
use switchboard_server::shutdown::DEFAULT_SHUTDOWN_TIMEOUT;
use switchboard_server::{StaticTokenVerifier, metrics};
use switchboard_settings::SwitchboardSettings;

/// Switchboard event stream server.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "Real-time event stream server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.switchboard/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn load_settings(&self) -> Result<SwitchboardSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(switchboard_settings::settings_path);
        let mut settings = switchboard_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

/// Build the server from loaded settings.
fn build_server(settings: &SwitchboardSettings, metrics: metrics::PrometheusHandle) -> SwitchboardServer {
    let verifier = StaticTokenVerifier::from_settings(&settings.auth);
    if verifier.is_empty() {
        tracing::warn!("no auth tokens configured, every stream request will be rejected");
    }
    SwitchboardServer::new(ServerConfig::from(settings), Arc::new(verifier), metrics)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    switchboard_logging::init_logging(&LoggingConfig::from(&settings.logging))
        .context("Failed to initialize logging")?;
    let metrics = metrics::install_recorder().context("Failed to install metrics recorder")?;

    let server = build_server(&settings, metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        name = %settings.name,
        keepalive_ms = settings.stream.keepalive_interval_ms,
        backlog = settings.stream.backlog_capacity,
        "switchboard listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(vec![handle], DEFAULT_SHUTDOWN_TIMEOUT)
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}
