//! `GET /events`: the long-lived event stream.
//!
//! Opening a stream registers the caller with the broker (replacing any
//! previous stream for the same identity), subscribes the topics named in the
//! `topics` query parameter, writes the `connected` sentinel, replays retained
//! events after the `Last-Event-ID` marker and then enters the live loop.
//!
//! Replay covers only the topics named in `topics`. Joins made through the
//! control plane arrive after the stream is open, too late to widen replay,
//! so a client that wants missed events must list its topics when it
//! reconnects. A marker sent without `topics` replays nothing.

use std::collections::{BTreeSet, HashSet};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use switchboard_broker::{Broker, ConnectionHandle};
use switchboard_core::{Event, Identity, Sequence, TOPIC_LIST_SEPARATOR, Topic};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::Authenticated;
use crate::error::ApiError;
use crate::frame;
use crate::server::AppState;

/// Resume marker header.
pub const LAST_EVENT_ID: &str = "last-event-id";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Query parameters accepted by the stream endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Comma separated topic keys to subscribe at open. Also the replay
    /// filter: without it a resume marker replays nothing.
    pub topics: Option<String>,
}

/// Parse the `topics` parameter into validated, deduplicated keys.
pub fn parse_topics(raw: Option<&str>) -> Result<BTreeSet<String>, ApiError> {
    let Some(raw) = raw else {
        return Ok(BTreeSet::new());
    };
    raw.split(TOPIC_LIST_SEPARATOR)
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(|key| {
            key.parse::<Topic>()
                .map(|topic| topic.key())
                .map_err(|e| ApiError::BadRequest(e.to_string()))
        })
        .collect()
}

/// Read the resume marker. Anything that is not a plain integer is ignored.
pub fn resume_marker(headers: &HeaderMap) -> Option<Sequence> {
    headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Retained events after `after`, restricted to `topics`.
fn replay_events(broker: &Broker, after: Sequence, topics: &BTreeSet<String>) -> Vec<Arc<Event>> {
    if let Some(oldest) = broker.oldest_retained_id() {
        if oldest > after.saturating_add(1) {
            debug!(after, oldest, "resume marker predates backlog, replay is partial");
        }
    }
    broker
        .since(after)
        .into_iter()
        .filter(|event| topics.contains(&event.topic))
        .collect()
}

pub(crate) async fn events_handler(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let topics = parse_topics(query.topics.as_deref())?;
    let marker = resume_marker(&headers);

    let handle = state.broker.add_client(identity.clone());
    for topic in &topics {
        let _ = state.broker.subscribe_topic(&identity, topic);
    }
    if marker.is_some() && topics.is_empty() {
        debug!(identity = %identity, "resume marker without topics, nothing to replay");
    }
    let replay = marker
        .map(|after| replay_events(&state.broker, after, &topics))
        .unwrap_or_default();
    let replayed: HashSet<Sequence> = replay.iter().map(|event| event.id).collect();

    info!(
        identity = %identity,
        connection_id = %handle.id(),
        topics = topics.len(),
        resume_from = marker,
        replayed = replay.len(),
        "event stream opened"
    );

    let mut opening = Vec::with_capacity(replay.len() + 1);
    opening.push(frame::connected_frame(handle.id(), state.broker.last_event_id()));
    opening.extend(replay.iter().filter_map(|event| frame::event_frame(event)));

    let live = LiveStream::new(
        handle,
        replayed,
        state.keepalive_interval,
        state.shutdown.child_token(),
    );
    let frames = futures::stream::iter(opening)
        .chain(futures::stream::unfold(live, |mut live| async move {
            live.next_frame().await.map(|frame| (frame, live))
        }))
        .map(Ok::<_, Infallible>);

    Ok((
        [(X_ACCEL_BUFFERING, HeaderValue::from_static("no"))],
        Sse::new(frames),
    )
        .into_response())
}

/// Live half of a stream. Owns the connection handle, so dropping the
/// response body releases the broker record.
struct LiveStream {
    handle: ConnectionHandle,
    /// Ids already written during replay; also queued if published after
    /// the subscription was made.
    replayed: HashSet<Sequence>,
    keepalive: Interval,
    shutdown: CancellationToken,
}

impl LiveStream {
    fn new(
        handle: ConnectionHandle,
        replayed: HashSet<Sequence>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            handle,
            replayed,
            keepalive,
            shutdown,
        }
    }

    fn identity(&self) -> &Identity {
        self.handle.identity()
    }

    /// Next frame to write, or `None` when the stream should end.
    async fn next_frame(&mut self) -> Option<SseEvent> {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    debug!(identity = %self.identity(), "stream ending for shutdown");
                    return None;
                }
                next = self.handle.recv() => {
                    let Some(event) = next else {
                        debug!(identity = %self.identity(), "stream queue closed");
                        return None;
                    };
                    if self.replayed.remove(&event.id) {
                        continue;
                    }
                    if let Some(frame) = frame::event_frame(&event) {
                        return Some(frame);
                    }
                }
                _ = self.keepalive.tick() => {
                    return Some(frame::keepalive_frame());
                }
            }
        }
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        info!(
            identity = %self.handle.identity(),
            connection_id = %self.handle.id(),
            dropped = self.handle.dropped_count(),
            "event stream closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_broker::BrokerConfig;
    use switchboard_core::EventType;

    #[test]
    fn parse_topics_empty() {
        assert!(parse_topics(None).unwrap().is_empty());
        assert!(parse_topics(Some("")).unwrap().is_empty());
        assert!(parse_topics(Some(" , ")).unwrap().is_empty());
    }

    #[test]
    fn parse_topics_dedupes_and_trims() {
        let topics = parse_topics(Some("org:A, thread:t1,org:A")).unwrap();
        assert_eq!(
            topics.into_iter().collect::<Vec<_>>(),
            vec!["org:A".to_string(), "thread:t1".to_string()]
        );
    }

    #[test]
    fn parse_topics_rejects_unknown_family() {
        let err = parse_topics(Some("org:A,room:1")).unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }

    #[test]
    fn resume_marker_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(resume_marker(&headers), None);
        let _ = headers.insert(LAST_EVENT_ID, HeaderValue::from_static("42"));
        assert_eq!(resume_marker(&headers), Some(42));
        let _ = headers.insert(LAST_EVENT_ID, HeaderValue::from_static("abc"));
        assert_eq!(resume_marker(&headers), None);
    }

    #[test]
    fn replay_filters_by_topic() {
        let broker = Broker::new(BrokerConfig::default());
        let _ = broker.publish("org:A", EventType::StatusUpdate, json!({}));
        let _ = broker.publish("org:B", EventType::StatusUpdate, json!({}));
        let _ = broker.publish("org:A", EventType::StatusUpdate, json!({}));
        let topics = BTreeSet::from(["org:A".to_string()]);
        let ids: Vec<Sequence> = replay_events(&broker, 0, &topics).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3]);
        let ids: Vec<Sequence> = replay_events(&broker, 1, &topics).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn live_stream_skips_replayed_ids() {
        let broker = Arc::new(Broker::new(BrokerConfig::default()));
        let identity = Identity::from("amy");
        let handle = broker.add_client(identity.clone());
        let _ = broker.subscribe_topic(&identity, "org:A");
        let _ = broker.publish("org:A", EventType::StatusUpdate, json!({}));
        let _ = broker.publish("org:A", EventType::StatusUpdate, json!({}));

        let mut live = LiveStream::new(
            handle,
            HashSet::from([1]),
            Duration::from_secs(15),
            CancellationToken::new(),
        );
        // id 1 skipped, id 2 delivered
        assert!(live.next_frame().await.is_some());
        assert!(live.handle.try_recv().is_err());
        assert!(live.replayed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn live_stream_keeps_unreplayed_typing_signal() {
        let broker = Arc::new(Broker::new(BrokerConfig::default()));
        let identity = Identity::from("amy");
        let handle = broker.add_client(identity.clone());
        let _ = broker.subscribe_topic(&identity, "thread:t1");
        let first = broker.publish("thread:t1", EventType::NewMessage, json!({}));
        let typing = broker.publish("thread:t1", EventType::TypingSignal, json!({"typing": true}));
        let last = broker.publish("thread:t1", EventType::NewMessage, json!({}));

        let topics = BTreeSet::from(["thread:t1".to_string()]);
        let replayed: HashSet<Sequence> = replay_events(&broker, 0, &topics).iter().map(|e| e.id).collect();
        assert_eq!(replayed, HashSet::from([first, last]));

        let mut live = LiveStream::new(handle, replayed, Duration::from_secs(15), CancellationToken::new());
        // the typing signal sits below the last replayed id but was never replayed
        assert!(live.next_frame().await.is_some());
        assert!(live.replayed.contains(&last));
        assert_eq!(live.handle.try_recv().unwrap().id, last);
        assert!(typing > first && typing < last);
    }

    #[tokio::test(start_paused = true)]
    async fn live_stream_emits_keepalive_then_ends_on_shutdown() {
        let broker = Arc::new(Broker::new(BrokerConfig::default()));
        let handle = broker.add_client(Identity::from("amy"));
        let token = CancellationToken::new();
        let mut live = LiveStream::new(handle, HashSet::new(), Duration::from_secs(15), token.clone());

        assert!(live.next_frame().await.is_some());
        token.cancel();
        assert!(live.next_frame().await.is_none());
        drop(live);
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn live_stream_ends_when_replaced() {
        let broker = Arc::new(Broker::new(BrokerConfig::default()));
        let identity = Identity::from("amy");
        let handle = broker.add_client(identity.clone());
        let mut live = LiveStream::new(handle, HashSet::new(), Duration::from_secs(15), CancellationToken::new());

        let _successor = broker.add_client(identity.clone());
        assert!(live.next_frame().await.is_none());
        drop(live);
        assert!(broker.is_connected(&identity));
    }
}
