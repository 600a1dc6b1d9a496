//! # switchboard-broker
//!
//! In-process event distribution:
//!
//! - [`Backlog`]: bounded ring of recent events for resume-after-reconnect
//! - [`Broker`]: one connection record per identity, topic subscriptions,
//!   global sequence assignment and non-blocking fan-out
//! - [`ConnectionHandle`]: the stream side of a registered connection
//! - [`Publisher`]: the surface domain handlers call after a commit
//!
//! Delivery is at-most-once per connection: a full outbound queue drops the
//! event for that connection only.

#![deny(unsafe_code)]

pub mod backlog;
pub mod broker;
pub mod connection;
pub mod metric_names;
pub mod publisher;

pub use backlog::Backlog;
pub use broker::{Broker, BrokerConfig};
pub use connection::ConnectionHandle;
pub use publisher::Publisher;
