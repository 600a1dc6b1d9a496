//! Published events.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ParseError;

/// Global sequence number assigned by the broker.
pub type Sequence = u64;

/// Kind of domain event carried by the stream.
///
/// The wire name (`event:` line) is the snake_case form.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An organization record changed status.
    StatusUpdate,
    /// A message was posted to a thread.
    NewMessage,
    /// Someone started or stopped typing in a thread.
    TypingSignal,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [Self; 3] = [Self::StatusUpdate, Self::NewMessage, Self::TypingSignal];

    /// Wire name used on the `event:` line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusUpdate => "status_update",
            Self::NewMessage => "new_message",
            Self::TypingSignal => "typing_signal",
        }
    }

    /// Whether events of this type are kept in the backlog for resume.
    ///
    /// Typing signals are presence noise: they are delivered live only.
    pub fn is_retained(self) -> bool {
        !matches!(self, Self::TypingSignal)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseError::UnknownEventType(s.to_owned()))
    }
}

/// A single published event. Immutable once created by the broker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Position in the global sequence.
    pub id: Sequence,
    /// Event kind.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Topic key the event was published to.
    pub topic: String,
    /// Opaque JSON payload chosen by the publisher.
    pub payload: Value,
    /// When the broker accepted the event.
    pub published_at: DateTime<Utc>,
}

impl Event {
    /// Build an event stamped with the current time.
    pub fn new(id: Sequence, event_type: EventType, topic: impl Into<String>, payload: Value) -> Self {
        Self {
            id,
            event_type,
            topic: topic.into(),
            payload,
            published_at: Utc::now(),
        }
    }
}
