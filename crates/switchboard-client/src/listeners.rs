//! Listener registry: multiple callbacks per event type, plus connection
//! state observers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use switchboard_core::{EventType, Sequence};

/// A typed event received from the stream.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEvent {
    /// Sequence number from the `id:` line.
    pub id: Option<Sequence>,
    /// Kind of event.
    pub event_type: EventType,
    /// Decoded JSON payload.
    pub payload: Value,
}

/// Connection lifecycle as seen by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No stream; waiting for `connect()`.
    Disconnected,
    /// Stream requested, `connected` frame not yet seen.
    Connecting,
    /// Stream open and reading.
    Connected,
}

/// Handle returned on registration, used to remove the listener.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct ListenerId(u64);

type EventCallback = Arc<dyn Fn(&StreamEvent) + Send + Sync>;
type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Observer lists keyed by event type.
///
/// Callbacks run on the stream reader task after the registry lock is
/// released, so a callback may register or remove listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    events: RwLock<HashMap<EventType, Vec<(ListenerId, EventCallback)>>>,
    states: RwLock<Vec<(ListenerId, StateCallback)>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Add a listener for one event type.
    pub fn on<F>(&self, event_type: EventType, callback: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let id = self.allocate();
        self.events
            .write()
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Add a connection state listener.
    pub fn on_state<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.allocate();
        self.states.write().push((id, Arc::new(callback)));
        id
    }

    /// Remove a listener of either kind. Returns `false` if unknown.
    pub fn remove(&self, id: ListenerId) -> bool {
        {
            let mut events = self.events.write();
            for list in events.values_mut() {
                if let Some(pos) = list.iter().position(|(lid, _)| *lid == id) {
                    let _ = list.remove(pos);
                    return true;
                }
            }
        }
        let mut states = self.states.write();
        if let Some(pos) = states.iter().position(|(lid, _)| *lid == id) {
            let _ = states.remove(pos);
            return true;
        }
        false
    }

    /// Listeners registered for `event_type`.
    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.events.read().get(&event_type).map_or(0, Vec::len)
    }

    /// Call every listener registered for the event's type, in registration
    /// order. Returns how many were called.
    pub fn dispatch(&self, event: &StreamEvent) -> usize {
        let callbacks: Vec<EventCallback> = self
            .events
            .read()
            .get(&event.event_type)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    /// Delivers a state change to every state listener.
    pub fn notify_state(&self, state: ConnectionState) {
        let callbacks: Vec<StateCallback> = self
            .states
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in &callbacks {
            callback(state);
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let events: usize = self.events.read().values().map(Vec::len).sum();
        f.debug_struct("ListenerRegistry")
            .field("event_listeners", &events)
            .field("state_listeners", &self.states.read().len())
            .finish()
    }
}
