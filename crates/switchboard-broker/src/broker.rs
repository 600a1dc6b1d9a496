//! Connection registry and event fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use metrics::{counter, gauge};
use parking_lot::{RwLock, RwLockWriteGuard};
use serde_json::Value;
use switchboard_core::{ConnectionId, Event, EventType, Identity, Sequence};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::backlog::Backlog;
use crate::connection::{ConnectionHandle, ConnectionRecord};
use crate::metric_names::{
    CONNECTIONS_ACTIVE, CONNECTIONS_OPENED_TOTAL, EVENTS_DROPPED_TOTAL, EVENTS_PUBLISHED_TOTAL,
};

/// Broker sizing.
#[derive(Clone, Copy, Debug)]
pub struct BrokerConfig {
    /// Number of retained events available for resume.
    pub backlog_capacity: usize,
    /// Per-connection outbound queue capacity.
    pub queue_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backlog_capacity: 512,
            queue_capacity: 64,
        }
    }
}

struct BrokerState {
    last_id: Sequence,
    backlog: Backlog,
    connections: HashMap<Identity, Arc<ConnectionRecord>>,
}

/// Registry of live connections, keyed by identity, plus the global event
/// sequence and backlog.
///
/// All shared state sits behind one reader/writer lock. `publish` holds it
/// exclusively only to assign an id and append to the backlog, then downgrades
/// to shared mode for the fan-out.
pub struct Broker {
    state: RwLock<BrokerState>,
    queue_capacity: usize,
}

impl Broker {
    /// Creates an empty broker with the given limits.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            state: RwLock::new(BrokerState {
                last_id: 0,
                backlog: Backlog::new(config.backlog_capacity),
                connections: HashMap::new(),
            }),
            queue_capacity: config.queue_capacity.max(1),
        }
    }

    /// Register a connection for `identity`, replacing any existing one.
    ///
    /// The replaced record is dropped, which closes its queue; its stream
    /// drains what was buffered and ends. The new record starts with no
    /// topic subscriptions.
    pub fn add_client(self: &Arc<Self>, identity: Identity) -> ConnectionHandle {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let record = Arc::new(ConnectionRecord::new(identity.clone(), tx, Arc::clone(&dropped)));
        let id = record.id.clone();

        let (replaced, active) = {
            let mut state = self.state.write();
            let replaced = state.connections.insert(identity.clone(), record);
            (replaced, state.connections.len())
        };

        counter!(CONNECTIONS_OPENED_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).set(active as f64);
        if let Some(old) = replaced {
            info!(
                identity = %identity,
                evicted = %old.id,
                connection_id = %id,
                "replaced existing connection for identity"
            );
        } else {
            debug!(identity = %identity, connection_id = %id, "connection registered");
        }

        ConnectionHandle::new(id, identity, rx, dropped, Arc::downgrade(self))
    }

    /// Remove the connection for `identity`, if any. Idempotent.
    pub fn remove_client(&self, identity: &Identity) -> bool {
        let removed = {
            let mut state = self.state.write();
            let removed = state.connections.remove(identity);
            gauge!(CONNECTIONS_ACTIVE).set(state.connections.len() as f64);
            removed
        };
        match removed {
            Some(record) => {
                info!(
                    identity = %identity,
                    connection_id = %record.id,
                    session_secs = record.age().as_secs(),
                    "connection removed"
                );
                true
            }
            None => false,
        }
    }

    /// Remove `identity`'s record only if it is still connection `id`.
    ///
    /// Used by [`ConnectionHandle`] on drop so that a replaced stream cannot
    /// remove its successor.
    pub(crate) fn release(&self, identity: &Identity, id: &ConnectionId) -> bool {
        let removed = {
            let mut state = self.state.write();
            if state.connections.get(identity).is_some_and(|r| &r.id == id) {
                let removed = state.connections.remove(identity);
                gauge!(CONNECTIONS_ACTIVE).set(state.connections.len() as f64);
                removed
            } else {
                None
            }
        };
        if let Some(record) = &removed {
            debug!(
                identity = %record.identity,
                connection_id = %record.id,
                session_secs = record.age().as_secs(),
                "connection released"
            );
        }
        removed.is_some()
    }

    /// Add `topic` to the identity's connection.
    ///
    /// Returns `false` when the identity has no live connection; a join racing
    /// a disconnect is not an error.
    pub fn subscribe_topic(&self, identity: &Identity, topic: &str) -> bool {
        let state = self.state.read();
        let Some(record) = state.connections.get(identity) else {
            debug!(identity = %identity, topic, "subscribe ignored, no connection");
            return false;
        };
        if record.subscribe(topic) {
            debug!(identity = %identity, connection_id = %record.id, topic, "subscribed");
        }
        true
    }

    /// Remove `topic` from the identity's connection. Returns `false` when the
    /// identity has no live connection.
    pub fn unsubscribe_topic(&self, identity: &Identity, topic: &str) -> bool {
        let state = self.state.read();
        let Some(record) = state.connections.get(identity) else {
            debug!(identity = %identity, topic, "unsubscribe ignored, no connection");
            return false;
        };
        if record.unsubscribe(topic) {
            debug!(identity = %identity, connection_id = %record.id, topic, "unsubscribed");
        }
        true
    }

    /// Assign the next id, retain the event (unless it is a typing signal) and
    /// enqueue it on every connection subscribed to `topic`.
    ///
    /// Never blocks on a consumer: a full queue drops the event for that
    /// connection only.
    pub fn publish(&self, topic: &str, event_type: EventType, payload: Value) -> Sequence {
        let mut state = self.state.write();
        state.last_id += 1;
        let id = state.last_id;
        let event = Arc::new(Event::new(id, event_type, topic, payload));
        if event_type.is_retained() {
            let _ = state.backlog.push(Arc::clone(&event));
        }

        // Downgrade without releasing: the next publisher cannot take an id
        // until this fan-out is done, so queues see ids in ascending order.
        let state = RwLockWriteGuard::downgrade(state);
        let mut recipients = 0u32;
        let mut dropped = 0u64;
        for record in state.connections.values() {
            if record.is_subscribed(topic) {
                recipients += 1;
                if !record.try_deliver(Arc::clone(&event)) {
                    dropped += 1;
                }
            }
        }
        drop(state);

        counter!(EVENTS_PUBLISHED_TOTAL, "type" => event_type.as_str()).increment(1);
        if dropped > 0 {
            counter!(EVENTS_DROPPED_TOTAL).increment(dropped);
        }
        debug!(
            event_id = id,
            event_type = event_type.as_str(),
            topic,
            recipients,
            dropped,
            "published event"
        );
        id
    }

    /// Retained events with id strictly greater than `after`, oldest first.
    pub fn since(&self, after: Sequence) -> Vec<Arc<Event>> {
        self.state.read().backlog.since(after)
    }

    /// Last id handed out (0 before the first publish).
    pub fn last_event_id(&self) -> Sequence {
        self.state.read().last_id
    }

    /// Oldest id still available for replay.
    pub fn oldest_retained_id(&self) -> Option<Sequence> {
        self.state.read().backlog.oldest_id()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Whether `identity` currently holds a live stream.
    pub fn is_connected(&self, identity: &Identity) -> bool {
        self.state.read().connections.contains_key(identity)
    }

    /// Current topics of the identity's connection, sorted.
    pub fn subscriptions(&self, identity: &Identity) -> Option<Vec<String>> {
        self.state.read().connections.get(identity).map(|r| r.topics())
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn broker_with(backlog_capacity: usize, queue_capacity: usize) -> Arc<Broker> {
        Arc::new(Broker::new(BrokerConfig {
            backlog_capacity,
            queue_capacity,
        }))
    }

    fn amy() -> Identity {
        Identity::from("amy")
    }

    fn drain(handle: &mut ConnectionHandle) -> Vec<Arc<Event>> {
        let mut out = Vec::new();
        while let Ok(event) = handle.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn ids_start_at_one_and_increment() {
        let broker = Broker::default();
        assert_eq!(broker.last_event_id(), 0);
        assert_eq!(broker.publish("org:A", EventType::StatusUpdate, json!({})), 1);
        assert_eq!(broker.publish("org:B", EventType::NewMessage, json!({})), 2);
        assert_eq!(broker.publish("thread:t", EventType::TypingSignal, json!({})), 3);
        assert_eq!(broker.last_event_id(), 3);
    }

    #[test]
    fn add_and_remove_client() {
        let broker = Arc::new(Broker::default());
        let handle = broker.add_client(amy());
        assert_eq!(broker.connection_count(), 1);
        assert!(broker.is_connected(&amy()));
        assert!(broker.remove_client(&amy()));
        assert!(!broker.is_connected(&amy()));
        assert!(!broker.remove_client(&amy()));
        drop(handle);
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn remove_client_closes_queue() {
        let broker = Arc::new(Broker::default());
        let mut handle = broker.add_client(amy());
        assert!(broker.remove_client(&amy()));
        assert!(handle.recv().await.is_none());
    }

    #[test]
    fn subscribe_without_connection_is_noop() {
        let broker = Broker::default();
        assert!(!broker.subscribe_topic(&amy(), "org:A"));
        assert!(!broker.unsubscribe_topic(&amy(), "org:A"));
        assert!(broker.subscriptions(&amy()).is_none());
    }

    #[test]
    fn subscriptions_reported_sorted() {
        let broker = Arc::new(Broker::default());
        let _handle = broker.add_client(amy());
        assert!(broker.subscribe_topic(&amy(), "thread:t1"));
        assert!(broker.subscribe_topic(&amy(), "org:A"));
        assert!(broker.subscribe_topic(&amy(), "org:A"));
        assert_eq!(
            broker.subscriptions(&amy()),
            Some(vec!["org:A".to_string(), "thread:t1".to_string()])
        );
        assert!(broker.unsubscribe_topic(&amy(), "org:A"));
        assert_eq!(broker.subscriptions(&amy()), Some(vec!["thread:t1".to_string()]));
    }

    #[test]
    fn topic_filtering() {
        let broker = broker_with(16, 16);
        let mut handle = broker.add_client(amy());
        let _ = broker.subscribe_topic(&amy(), "org:A");

        let a1 = broker.publish("org:A", EventType::StatusUpdate, json!({"n": 1}));
        let _ = broker.publish("org:B", EventType::StatusUpdate, json!({"n": 2}));
        let _ = broker.publish("thread:x", EventType::NewMessage, json!({"n": 3}));
        let a2 = broker.publish("org:A", EventType::NewMessage, json!({"n": 4}));

        let got: Vec<Sequence> = drain(&mut handle).iter().map(|e| e.id).collect();
        assert_eq!(got, vec![a1, a2]);
    }

    #[test]
    fn full_queue_drops_for_that_connection_only() {
        let broker = broker_with(16, 2);
        let mut slow = broker.add_client(Identity::from("slow"));
        let mut fast = broker.add_client(Identity::from("fast"));
        let _ = broker.subscribe_topic(&Identity::from("slow"), "org:A");
        let _ = broker.subscribe_topic(&Identity::from("fast"), "org:A");

        let _ = broker.publish("org:A", EventType::StatusUpdate, json!({}));
        let _ = broker.publish("org:A", EventType::StatusUpdate, json!({}));
        // fast keeps up, slow does not
        assert_eq!(drain(&mut fast).len(), 2);
        let _ = broker.publish("org:A", EventType::StatusUpdate, json!({}));

        assert_eq!(slow.dropped_count(), 1);
        assert_eq!(fast.dropped_count(), 0);
        assert_eq!(drain(&mut slow).iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(drain(&mut fast).iter().map(|e| e.id).collect::<Vec<_>>(), vec![3]);
        // the dropped event is still in the backlog
        assert_eq!(broker.since(2).len(), 1);
    }

    #[test]
    fn readd_starts_with_empty_topics() {
        let broker = Arc::new(Broker::default());
        let _first = broker.add_client(amy());
        let _ = broker.subscribe_topic(&amy(), "org:A");
        assert!(broker.remove_client(&amy()));
        let _second = broker.add_client(amy());
        assert_eq!(broker.subscriptions(&amy()), Some(Vec::new()));
    }

    #[tokio::test]
    async fn replacement_closes_old_queue_and_keeps_new() {
        let broker = broker_with(16, 16);
        let mut old = broker.add_client(amy());
        let _ = broker.subscribe_topic(&amy(), "org:A");
        let new = broker.add_client(amy());
        assert_ne!(old.id(), new.id());
        assert_eq!(broker.connection_count(), 1);
        assert_eq!(broker.subscriptions(&amy()), Some(Vec::new()));

        assert!(old.recv().await.is_none());
        drop(old);
        // the stale handle must not evict its successor
        assert!(broker.is_connected(&amy()));

        drop(new);
        assert!(!broker.is_connected(&amy()));
    }

    #[test]
    fn typing_signals_are_not_retained() {
        let broker = broker_with(16, 16);
        let mut handle = broker.add_client(amy());
        let _ = broker.subscribe_topic(&amy(), "thread:t1");

        let _ = broker.publish("thread:t1", EventType::NewMessage, json!({}));
        let typing = broker.publish("thread:t1", EventType::TypingSignal, json!({"typing": true}));
        let _ = broker.publish("thread:t1", EventType::NewMessage, json!({}));

        let live: Vec<Sequence> = drain(&mut handle).iter().map(|e| e.id).collect();
        assert_eq!(live, vec![1, typing, 3]);
        let replay: Vec<Sequence> = broker.since(0).iter().map(|e| e.id).collect();
        assert_eq!(replay, vec![1, 3]);
    }

    #[test]
    fn since_respects_capacity() {
        let broker = broker_with(512, 1);
        for n in 1..=600 {
            let _ = broker.publish("org:A", EventType::StatusUpdate, json!({"n": n}));
        }
        let replay = broker.since(50);
        assert_eq!(replay.len(), 512);
        assert_eq!(replay.first().map(|e| e.id), Some(89));
        assert_eq!(replay.last().map(|e| e.id), Some(600));
        assert_eq!(broker.oldest_retained_id(), Some(89));
    }

    #[test]
    fn concurrent_publishers_produce_dense_sequence() {
        let broker = broker_with(4096, 4096);
        let mut handle = broker.add_client(amy());
        let _ = broker.subscribe_topic(&amy(), "org:A");

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let broker = Arc::clone(&broker);
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| broker.publish("org:A", EventType::StatusUpdate, json!({})))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<Sequence> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (1..=1000).collect::<Vec<_>>());

        // per-connection delivery follows the global order
        let delivered: Vec<Sequence> = drain(&mut handle).iter().map(|e| e.id).collect();
        assert_eq!(delivered, (1..=1000).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn publish_ids_are_dense(topics in proptest::collection::vec("(org|thread):[a-c]", 1..100)) {
            let broker = Broker::default();
            let ids: Vec<Sequence> = topics
                .iter()
                .map(|t| broker.publish(t, EventType::NewMessage, json!({})))
                .collect();
            let expected: Vec<Sequence> = (1..=topics.len() as u64).collect();
            prop_assert_eq!(ids, expected);
        }
    }
}
