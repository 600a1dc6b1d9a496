//! Publish surface for domain handlers.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use switchboard_core::{EventType, Sequence, Topic};
use tracing::{debug, warn};

use crate::broker::Broker;

/// Narrow handle domain code uses to emit events after a state change commits.
///
/// Emitting never fails the caller. A payload that cannot be serialized is
/// logged and skipped; a publisher without a broker discards everything.
#[derive(Clone, Default)]
pub struct Publisher {
    broker: Option<Arc<Broker>>,
}

impl Publisher {
    /// Wraps a broker handle.
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            broker: Some(broker),
        }
    }

    /// A publisher that logs and discards every event.
    pub fn disabled() -> Self {
        Self { broker: None }
    }

    /// Whether the underlying broker is accepting events.
    pub fn is_enabled(&self) -> bool {
        self.broker.is_some()
    }

    /// Publish `payload` to `topic`. Returns the assigned id, or `None` when
    /// the event was not published.
    pub fn emit<P: Serialize>(&self, topic: &Topic, event_type: EventType, payload: P) -> Option<Sequence> {
        let Some(broker) = &self.broker else {
            debug!(topic = %topic, event_type = event_type.as_str(), "publisher disabled, event discarded");
            return None;
        };
        let payload: Value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(error) => {
                warn!(
                    topic = %topic,
                    event_type = event_type.as_str(),
                    error = %error,
                    "failed to encode event payload"
                );
                return None;
            }
        };
        Some(broker.publish(&topic.key(), event_type, payload))
    }

    /// Publishes a `status_update` event.
    pub fn emit_status_update<P: Serialize>(&self, topic: &Topic, payload: P) -> Option<Sequence> {
        self.emit(topic, EventType::StatusUpdate, payload)
    }

    /// Publishes a `new_message` event.
    pub fn emit_new_message<P: Serialize>(&self, topic: &Topic, payload: P) -> Option<Sequence> {
        self.emit(topic, EventType::NewMessage, payload)
    }

    /// Publishes a `typing_signal` event.
    pub fn emit_typing_signal<P: Serialize>(&self, topic: &Topic, payload: P) -> Option<Sequence> {
        self.emit(topic, EventType::TypingSignal, payload)
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
