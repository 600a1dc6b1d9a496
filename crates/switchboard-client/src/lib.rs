//! # switchboard-client
//!
//! Client side of the switchboard event stream.
//!
//! - [`SubscriptionManager`]: owns the stream, the desired topic set and the
//!   resume marker; re-asserts topics on every connect
//! - [`ListenerRegistry`]: multiple listeners per event type plus
//!   connection state observers
//! - [`ControlPlane`]: join, leave and typing calls, over HTTP by default
//! - [`Backoff`]: delay helper for applications that retry `connect()`

#![deny(unsafe_code)]

pub mod backoff;
pub mod control;
pub mod decoder;
pub mod error;
pub mod listeners;
pub mod manager;

pub use backoff::Backoff;
pub use control::{ControlPlane, HttpControlPlane, SubscriptionAck};
pub use decoder::Frame;
pub use error::ClientError;
pub use listeners::{ConnectionState, ListenerId, ListenerRegistry, StreamEvent};
pub use manager::{ClientConfig, ConnectReport, SubscriptionManager};
