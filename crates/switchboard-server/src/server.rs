//! `SwitchboardServer`: Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{FromRef, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use switchboard_broker::{Broker, Publisher};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::SharedVerifier;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::{control, metrics, stream};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry and event sequence.
    pub broker: Arc<Broker>,
    /// Publish surface used by the typing endpoints.
    pub publisher: Publisher,
    /// Bearer credential verifier.
    pub verifier: SharedVerifier,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
    /// Interval between keepalive frames on each stream.
    pub keepalive_interval: Duration,
}

impl FromRef<AppState> for SharedVerifier {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.verifier)
    }
}

/// The switchboard server.
pub struct SwitchboardServer {
    config: ServerConfig,
    broker: Arc<Broker>,
    verifier: SharedVerifier,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl SwitchboardServer {
    /// Create a server with its own broker sized from `config`.
    pub fn new(config: ServerConfig, verifier: SharedVerifier, metrics: PrometheusHandle) -> Self {
        let broker = Arc::new(Broker::new(config.broker_config()));
        Self {
            config,
            broker,
            verifier,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            broker: Arc::clone(&self.broker),
            publisher: self.publisher(),
            verifier: Arc::clone(&self.verifier),
            shutdown: Arc::clone(&self.shutdown),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            keepalive_interval: self.config.keepalive_interval(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/events", get(stream::events_handler))
            .route("/api/orgs/{id}/join", post(control::join_org))
            .route("/api/orgs/{id}/leave", post(control::leave_org))
            .route("/api/threads/{id}/join", post(control::join_thread))
            .route("/api/threads/{id}/leave", post(control::leave_thread))
            .route("/api/threads/{id}/typing/start", post(control::typing_start))
            .route("/api/threads/{id}/typing/stop", post(control::typing_stop))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve until shutdown. Returns the bound address and the
    /// server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %error, "http server failed");
            }
            info!("http server stopped");
        });

        info!(%addr, "switchboard listening");
        Ok((addr, handle))
    }

    /// Broker shared by all handlers.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// A publisher bound to this server's broker.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(Arc::clone(&self.broker))
    }

    /// Shutdown signal shared with open streams.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Settings the server was started with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.broker.connection_count(),
        state.broker.last_event_id(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(&state.metrics),
    )
}
