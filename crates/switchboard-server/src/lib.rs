//! # switchboard-server
//!
//! Axum HTTP server in front of the broker.
//!
//! - `GET /events?topics=org:A,thread:t1`: authenticated event stream with
//!   keepalive; `Last-Event-ID` replays missed events for the listed topics
//! - `POST /api/{orgs,threads}/{id}/{join,leave}`: per-caller topic control;
//!   ids may not contain `,` or surrounding whitespace
//! - `POST /api/threads/{id}/typing/{start,stop}`: typing signals
//! - `GET /health`, `GET /metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod control;
pub mod error;
pub mod frame;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod stream;

pub use auth::{AuthError, IdentityVerifier, SharedVerifier, StaticTokenVerifier};
pub use config::ServerConfig;
pub use error::ApiError;
pub use server::{AppState, SwitchboardServer};
pub use shutdown::ShutdownCoordinator;
