//! Parse errors for wire-level names.

use thiserror::Error;

/// Errors produced when decoding topic keys or event type names.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The `event:` name did not match a known [`EventType`](crate::EventType).
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
    /// The topic key was not of the form `org:<id>` or `thread:<id>`.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
    /// The topic id is empty, contains `,` or has surrounding whitespace.
    #[error("invalid topic id: {0:?}")]
    InvalidTopicId(String),
}
