//! Connection records and the handle a stream holds for its lifetime.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use switchboard_core::{ConnectionId, Event, Identity};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use crate::broker::Broker;

/// Registry-side state of one open stream.
///
/// The record holds the only sender for the connection's queue, so dropping
/// the record closes the queue and the stream observes end-of-input.
pub(crate) struct ConnectionRecord {
    pub(crate) id: ConnectionId,
    pub(crate) identity: Identity,
    tx: mpsc::Sender<Arc<Event>>,
    topics: Mutex<BTreeSet<String>>,
    connected_at: Instant,
    dropped: Arc<AtomicU64>,
}

impl ConnectionRecord {
    pub(crate) fn new(
        identity: Identity,
        tx: mpsc::Sender<Arc<Event>>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            identity,
            tx,
            topics: Mutex::new(BTreeSet::new()),
            connected_at: Instant::now(),
            dropped,
        }
    }

    pub(crate) fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.lock().contains(topic)
    }

    /// Returns `true` if the topic was newly added.
    pub(crate) fn subscribe(&self, topic: &str) -> bool {
        self.topics.lock().insert(topic.to_owned())
    }

    /// Returns `true` if the topic was present.
    pub(crate) fn unsubscribe(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic)
    }

    pub(crate) fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    pub(crate) fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Non-blocking enqueue. A full queue counts as a drop; a closed queue
    /// means the stream is already gone.
    pub(crate) fn try_deliver(&self, event: Arc<Event>) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// The stream side of a registered connection.
///
/// Dropping the handle removes the connection from the broker, unless the
/// broker has already replaced it with a newer connection for the same
/// identity.
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Identity,
    rx: mpsc::Receiver<Arc<Event>>,
    dropped: Arc<AtomicU64>,
    broker: Weak<Broker>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: ConnectionId,
        identity: Identity,
        rx: mpsc::Receiver<Arc<Event>>,
        dropped: Arc<AtomicU64>,
        broker: Weak<Broker>,
    ) -> Self {
        Self {
            id,
            identity,
            rx,
            dropped,
            broker,
        }
    }

    /// Unique id of this stream.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Identity that opened the stream.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Wait for the next outbound event.
    ///
    /// Returns `None` once the registry has closed this connection's queue
    /// (removal or replacement) and the buffered events are drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Result<Arc<Event>, TryRecvError> {
        self.rx.try_recv()
    }

    /// Events dropped for this connection because its queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(broker) = self.broker.upgrade() {
            let _ = broker.release(&self.identity, &self.id);
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("dropped", &self.dropped_count())
            .finish_non_exhaustive()
    }
}
