//! # switchboard-core
//!
//! Foundation types shared by the broker, the HTTP server and the client:
//!
//! - [`Event`] / [`EventType`]: the immutable unit of fan-out
//! - [`Topic`]: typed routing keys (`org:<id>`, `thread:<id>`)
//! - [`Identity`] / [`ConnectionId`]: who is subscribing, and which stream

#![deny(unsafe_code)]

pub mod errors;
pub mod event;
pub mod ids;
pub mod topic;

pub use errors::ParseError;
pub use event::{Event, EventType, Sequence};
pub use ids::{ConnectionId, Identity};
pub use topic::{TOPIC_LIST_SEPARATOR, Topic};
