//! Subscription manager against a real server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use switchboard_client::{
    ClientConfig, ClientError, ConnectionState, ControlPlane, HttpControlPlane, StreamEvent, SubscriptionAck,
    SubscriptionManager,
};
use switchboard_core::{EventType, Identity, Topic};
use switchboard_server::{ServerConfig, StaticTokenVerifier, SwitchboardServer};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn boot_server() -> (String, Arc<SwitchboardServer>) {
    let config = ServerConfig {
        keepalive_interval_ms: 200,
        ..ServerConfig::default()
    };
    let verifier = StaticTokenVerifier::new([("tok-amy", "amy"), ("tok-bob", "bob")]);
    let server = Arc::new(SwitchboardServer::new(
        config,
        Arc::new(verifier),
        switchboard_server::metrics::detached_handle(),
    ));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("http://{addr}"), server)
}

fn manager(base: &str, token: &str) -> SubscriptionManager {
    SubscriptionManager::new(ClientConfig::new(base, token)).unwrap()
}

/// Forward every event of `event_type` into a channel.
fn collect(mgr: &SubscriptionManager, event_type: EventType) -> mpsc::UnboundedReceiver<StreamEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = mgr.on(event_type, move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

fn collect_states(mgr: &SubscriptionManager) -> mpsc::UnboundedReceiver<ConnectionState> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = mgr.on_state(move |state| {
        let _ = tx.send(state);
    });
    rx
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(TIMEOUT, rx.recv()).await.expect("timed out").expect("channel closed")
}

async fn wait_for_state(rx: &mut mpsc::UnboundedReceiver<ConnectionState>, want: ConnectionState) {
    loop {
        if next(rx).await == want {
            return;
        }
    }
}

#[tokio::test]
async fn connect_reaches_connected_state() {
    let (base, server) = boot_server().await;
    let mgr = manager(&base, "tok-amy");
    let mut states = collect_states(&mgr);

    let report = mgr.connect().await.unwrap();
    assert!(report.connection_id.starts_with("conn_"));
    assert_eq!(report.resumed_from, None);
    assert!(report.joined.is_empty());
    assert!(mgr.is_connected());
    assert!(server.broker().is_connected(&Identity::from("amy")));

    assert_eq!(next(&mut states).await, ConnectionState::Connecting);
    assert_eq!(next(&mut states).await, ConnectionState::Connected);
}

#[tokio::test]
async fn joined_topic_events_reach_every_listener() {
    let (base, server) = boot_server().await;
    let mgr = manager(&base, "tok-amy");
    let mut first = collect(&mgr, EventType::NewMessage);
    let mut second = collect(&mgr, EventType::NewMessage);
    let mut status = collect(&mgr, EventType::StatusUpdate);

    let _ = mgr.connect().await.unwrap();
    let ack = mgr.join_topic(Topic::org("A")).await.unwrap();
    assert!(ack.subscribed && ack.connected);

    let publisher = server.publisher();
    let _ = publisher.emit_new_message(&Topic::org("B"), json!({"body": "elsewhere"}));
    let id = publisher.emit_new_message(&Topic::org("A"), json!({"body": "hi"})).unwrap();
    let _ = publisher.emit_status_update(&Topic::org("A"), json!({"status": "done"}));

    for rx in [&mut first, &mut second] {
        let event = next(rx).await;
        assert_eq!(event.id, Some(id));
        assert_eq!(event.payload, json!({"body": "hi"}));
    }
    assert_eq!(next(&mut status).await.payload, json!({"status": "done"}));
    assert_eq!(mgr.last_event_id(), Some(id + 1));
}

#[tokio::test]
async fn reconnect_resumes_and_rejoins() {
    let (base, server) = boot_server().await;
    let mgr = manager(&base, "tok-amy");
    let mut messages = collect(&mgr, EventType::NewMessage);
    let publisher = server.publisher();

    let _ = mgr.connect().await.unwrap();
    let _ = mgr.join_topic(Topic::org("A")).await.unwrap();
    let _ = mgr.join_topic(Topic::thread("t1")).await.unwrap();
    let seen = publisher.emit_new_message(&Topic::org("A"), json!({"n": 1})).unwrap();
    assert_eq!(next(&mut messages).await.id, Some(seen));

    mgr.disconnect();
    assert_eq!(mgr.state(), ConnectionState::Disconnected);
    let missed_org = publisher.emit_new_message(&Topic::org("A"), json!({"n": 2})).unwrap();
    let _ = publisher.emit_new_message(&Topic::org("Z"), json!({"n": 3}));
    let missed_thread = publisher.emit_new_message(&Topic::thread("t1"), json!({"n": 4})).unwrap();

    let report = mgr.connect().await.unwrap();
    assert_eq!(report.resumed_from, Some(seen));
    assert_eq!(report.joined, vec![Topic::org("A"), Topic::thread("t1")]);
    assert!(report.all_joined());

    assert_eq!(next(&mut messages).await.id, Some(missed_org));
    assert_eq!(next(&mut messages).await.id, Some(missed_thread));

    let live = publisher.emit_new_message(&Topic::thread("t1"), json!({"n": 5})).unwrap();
    assert_eq!(next(&mut messages).await.id, Some(live));
    let mut subs = server.broker().subscriptions(&Identity::from("amy")).unwrap();
    subs.sort();
    assert_eq!(subs, vec!["org:A".to_string(), "thread:t1".to_string()]);
}

/// Control plane whose joins start failing once `failing` is set.
#[derive(Default)]
struct FlakyControl {
    failing: AtomicBool,
}

#[async_trait]
impl ControlPlane for FlakyControl {
    async fn join(&self, topic: &Topic) -> Result<SubscriptionAck, ClientError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                status: 503,
                code: None,
                message: "unavailable".into(),
            });
        }
        Ok(SubscriptionAck {
            topic: topic.key(),
            subscribed: false,
            connected: false,
        })
    }

    async fn leave(&self, topic: &Topic) -> Result<SubscriptionAck, ClientError> {
        self.join(topic).await
    }

    async fn typing(&self, _thread_id: &str, _name: &str, _typing: bool) -> Result<(), ClientError> {
        Ok(())
    }
}

#[tokio::test]
async fn rejoin_failures_are_reported_not_fatal() {
    let (base, _server) = boot_server().await;
    let control = Arc::new(FlakyControl::default());
    let mgr = SubscriptionManager::with_control_plane(
        ClientConfig::new(&base, "tok-amy"),
        Arc::clone(&control) as Arc<dyn ControlPlane>,
    )
    .unwrap();
    let _ = mgr.join_topic(Topic::org("A")).await.unwrap();
    let _ = mgr.join_topic(Topic::thread("t1")).await.unwrap();

    control.failing.store(true, Ordering::SeqCst);
    let report = mgr.connect().await.unwrap();
    assert!(!report.all_joined());
    assert!(report.joined.is_empty());
    let failed: Vec<Topic> = report.failed.iter().map(|(topic, _)| topic.clone()).collect();
    assert_eq!(failed, vec![Topic::org("A"), Topic::thread("t1")]);
    assert!(report.failed[0].1.contains("503"));
    assert!(mgr.is_connected());
    assert_eq!(mgr.desired_topics().len(), 2);
}

#[tokio::test]
async fn join_before_connect_is_applied_on_connect() {
    let (base, server) = boot_server().await;
    let mgr = manager(&base, "tok-amy");
    let mut messages = collect(&mgr, EventType::NewMessage);

    let ack = mgr.join_topic(Topic::org("A")).await.unwrap();
    assert!(!ack.connected);
    let report = mgr.connect().await.unwrap();
    assert_eq!(report.joined, vec![Topic::org("A")]);

    let id = server.publisher().emit_new_message(&Topic::org("A"), json!({})).unwrap();
    assert_eq!(next(&mut messages).await.id, Some(id));
}

#[tokio::test]
async fn second_session_evicts_first() {
    let (base, _server) = boot_server().await;
    let first = manager(&base, "tok-amy");
    let mut first_states = collect_states(&first);
    let _ = first.connect().await.unwrap();
    wait_for_state(&mut first_states, ConnectionState::Connected).await;

    let second = manager(&base, "tok-amy");
    let _ = second.connect().await.unwrap();

    wait_for_state(&mut first_states, ConnectionState::Disconnected).await;
    assert!(!first.is_connected());
    assert!(second.is_connected());
}

#[tokio::test]
async fn server_shutdown_disconnects_without_retry() {
    let (base, server) = boot_server().await;
    let mgr = manager(&base, "tok-amy");
    let mut states = collect_states(&mgr);
    let _ = mgr.connect().await.unwrap();
    wait_for_state(&mut states, ConnectionState::Connected).await;

    server.shutdown().shutdown();
    wait_for_state(&mut states, ConnectionState::Disconnected).await;

    // no automatic reconnect attempt follows
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(states.try_recv().is_err());
    assert_eq!(mgr.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn bad_token_fails_connect() {
    let (base, _server) = boot_server().await;
    let mgr = manager(&base, "tok-nobody");
    let err = mgr.connect().await.unwrap_err();
    assert!(err.is_unauthorized(), "unexpected error: {err}");
    assert_matches!(err, ClientError::Status { code: Some(ref code), .. } if code == "UNAUTHORIZED");
    assert_eq!(mgr.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn typing_signal_reaches_other_subscriber() {
    let (base, _server) = boot_server().await;
    let amy = manager(&base, "tok-amy");
    let bob = manager(&base, "tok-bob");
    let mut typing = collect(&bob, EventType::TypingSignal);

    let _ = bob.connect().await.unwrap();
    let _ = bob.join_topic(Topic::thread("t1")).await.unwrap();

    amy.typing_start("t1", "Amy").await.unwrap();
    let event = next(&mut typing).await;
    assert_eq!(event.payload["threadId"], "t1");
    assert_eq!(event.payload["identity"], "amy");
    assert_eq!(event.payload["typing"], true);

    amy.typing_stop("t1", "Amy").await.unwrap();
    assert_eq!(next(&mut typing).await.payload["typing"], false);
}

#[tokio::test]
async fn comma_topic_id_never_blocks_reconnect() {
    let (base, server) = boot_server().await;
    let mgr = manager(&base, "tok-amy");
    let _ = mgr.connect().await.unwrap();
    let _ = mgr.join_topic(Topic::thread("t1")).await.unwrap();
    assert_matches!(
        mgr.join_topic(Topic::thread("a,b")).await,
        Err(ClientError::InvalidTopic(_))
    );
    assert_eq!(mgr.desired_topics(), vec![Topic::thread("t1")]);

    mgr.disconnect();
    let report = mgr.connect().await.unwrap();
    assert_eq!(report.joined, vec![Topic::thread("t1")]);
    assert_eq!(
        server.broker().subscriptions(&Identity::from("amy")),
        Some(vec!["thread:t1".to_string()])
    );
}

#[tokio::test]
async fn server_rejects_comma_topic_id_from_any_client() {
    let (base, _server) = boot_server().await;
    let control = HttpControlPlane::new(reqwest::Client::new(), format!("{base}/").parse().unwrap(), "tok-amy");
    let err = control.join(&Topic::thread("a,b")).await.unwrap_err();
    assert_matches!(err, ClientError::Status { status: 400, .. });
}

/// Forwards to the HTTP control plane and records each join in a shared log.
struct LoggedControl {
    inner: HttpControlPlane,
    log: Arc<parking_lot::Mutex<Vec<String>>>,
}

#[async_trait]
impl ControlPlane for LoggedControl {
    async fn join(&self, topic: &Topic) -> Result<SubscriptionAck, ClientError> {
        self.log.lock().push(format!("join {topic}"));
        self.inner.join(topic).await
    }

    async fn leave(&self, topic: &Topic) -> Result<SubscriptionAck, ClientError> {
        self.inner.leave(topic).await
    }

    async fn typing(&self, thread_id: &str, name: &str, typing: bool) -> Result<(), ClientError> {
        self.inner.typing(thread_id, name, typing).await
    }
}

#[tokio::test]
async fn connected_only_after_topics_rejoined() {
    let (base, _server) = boot_server().await;
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let control = LoggedControl {
        inner: HttpControlPlane::new(reqwest::Client::new(), format!("{base}/").parse().unwrap(), "tok-amy"),
        log: Arc::clone(&log),
    };
    let mgr = SubscriptionManager::with_control_plane(ClientConfig::new(&base, "tok-amy"), Arc::new(control)).unwrap();
    let _ = mgr.join_topic(Topic::org("A")).await.unwrap();
    let _ = mgr.join_topic(Topic::thread("t1")).await.unwrap();
    log.lock().clear();

    let sink = Arc::clone(&log);
    let _ = mgr.on_state(move |state| sink.lock().push(format!("{state:?}")));
    let _ = mgr.connect().await.unwrap();

    assert_eq!(
        *log.lock(),
        vec!["Connecting", "join org:A", "join thread:t1", "Connected"]
    );
}
