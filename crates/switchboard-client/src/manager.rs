//! The client-side subscription manager.
//!
//! Owns the desired topic set and the stream reader task. Every successful
//! `connect()` opens a fresh stream (resuming from the last seen id), waits
//! for the `connected` frame and re-asserts each desired topic through the
//! control plane. When the stream ends the manager reports `Disconnected` and
//! waits for the application to call `connect()` again.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Url;
use serde::Deserialize;
use switchboard_core::{EventType, Sequence, Topic};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::{self, ControlPlane, HttpControlPlane, SubscriptionAck};
use crate::decoder::{self, Frame, FrameStream, Message};
use crate::error::ClientError;
use crate::listeners::{ConnectionState, ListenerId, ListenerRegistry, StreamEvent};

const CONNECTED_EVENT: &str = "connected";

/// Where and how to connect.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server base URL, e.g. `http://localhost:8700`.
    pub base_url: String,
    /// Bearer credential.
    pub token: String,
    /// Limit on TCP connect plus the wait for the `connected` frame.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Config with default timings.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of one `connect()` call.
#[derive(Clone, Debug, Default)]
pub struct ConnectReport {
    /// Server-assigned id of the new stream.
    pub connection_id: String,
    /// Resume marker sent, if any.
    pub resumed_from: Option<Sequence>,
    /// Topics re-asserted successfully.
    pub joined: Vec<Topic>,
    /// Topics whose join call failed, with the error text.
    pub failed: Vec<(Topic, String)>,
}

impl ConnectReport {
    /// True when no topic failed to rejoin.
    pub fn all_joined(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sentinel {
    connection_id: String,
}

/// State shared with the reader task.
struct Shared {
    listeners: ListenerRegistry,
    last_event_id: Mutex<Option<Sequence>>,
    state: Mutex<ConnectionState>,
    generation: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let changed = {
            let mut current = self.state.lock();
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            self.listeners.notify_state(state);
        }
    }

    /// Apply `state` only while `generation` is still the live stream.
    ///
    /// With `retire`, the generation is also closed so that a later
    /// transition for it is ignored. Both checks happen under the state lock.
    fn transition(&self, generation: u64, state: ConnectionState, retire: bool) -> bool {
        let changed = {
            let mut current = self.state.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            if retire {
                let _ = self.generation.fetch_add(1, Ordering::SeqCst);
            }
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            self.listeners.notify_state(state);
        }
        true
    }

    /// Record the id and dispatch a message frame.
    fn handle_message(&self, message: Message) {
        let id = message.id.as_deref().and_then(|id| id.trim().parse::<Sequence>().ok());
        if let Some(id) = id {
            *self.last_event_id.lock() = Some(id);
        }
        let Some(name) = message.event.as_deref() else {
            debug!("ignoring unnamed stream message");
            return;
        };
        let event_type = match name.parse::<EventType>() {
            Ok(event_type) => event_type,
            Err(error) => {
                debug!(error = %error, "ignoring stream message");
                return;
            }
        };
        let payload = match serde_json::from_str(&message.data) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(event_type = name, error = %error, "undecodable event payload");
                return;
            }
        };
        let _ = self.listeners.dispatch(&StreamEvent {
            id,
            event_type,
            payload,
        });
    }
}

struct Reader {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Client-side owner of one identity's stream and topic intent.
pub struct SubscriptionManager {
    config: ClientConfig,
    base_url: Url,
    http: reqwest::Client,
    control: Arc<dyn ControlPlane>,
    desired: Mutex<BTreeSet<Topic>>,
    shared: Arc<Shared>,
    reader: Mutex<Option<Reader>>,
}

impl SubscriptionManager {
    /// A manager using the server's HTTP control plane.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = build_http(&config)?;
        let base_url = parse_base(&config.base_url)?;
        let control = Arc::new(HttpControlPlane::new(http.clone(), base_url.clone(), config.token.clone()));
        Ok(Self::assemble(config, base_url, http, control))
    }

    /// A manager with a caller-supplied control plane.
    pub fn with_control_plane(config: ClientConfig, control: Arc<dyn ControlPlane>) -> Result<Self, ClientError> {
        let http = build_http(&config)?;
        let base_url = parse_base(&config.base_url)?;
        Ok(Self::assemble(config, base_url, http, control))
    }

    fn assemble(config: ClientConfig, base_url: Url, http: reqwest::Client, control: Arc<dyn ControlPlane>) -> Self {
        Self {
            config,
            base_url,
            http,
            control,
            desired: Mutex::new(BTreeSet::new()),
            shared: Arc::new(Shared {
                listeners: ListenerRegistry::new(),
                last_event_id: Mutex::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
            }),
            reader: Mutex::new(None),
        }
    }

    /// Open (or reopen) the stream and re-assert every desired topic.
    ///
    /// The state stays `Connecting` until the re-joins are done, then turns
    /// `Connected`. Join failures are reported in the returned
    /// [`ConnectReport`]; they do not fail the connection. Any previous
    /// stream is closed first.
    pub async fn connect(&self) -> Result<ConnectReport, ClientError> {
        let _ = self.stop_reader();
        self.shared.set_state(ConnectionState::Connecting);

        let (frames, report) = match self.open_stream().await {
            Ok(opened) => opened,
            Err(error) => {
                warn!(error = %error, "stream connect failed");
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(error);
            }
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.spawn_reader(frames, generation);
        let report = self.reassert_topics(report).await;

        if self.shared.transition(generation, ConnectionState::Connected, false) {
            info!(
                connection_id = %report.connection_id,
                resumed_from = report.resumed_from,
                joined = report.joined.len(),
                failed = report.failed.len(),
                "stream connected"
            );
        } else {
            debug!(connection_id = %report.connection_id, "stream closed before topics were re-joined");
        }
        Ok(report)
    }

    async fn open_stream(&self) -> Result<(FrameStream, ConnectReport), ClientError> {
        let mut url = self
            .base_url
            .join("events")
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let topics: Vec<String> = self.desired.lock().iter().map(Topic::key).collect();
        if !topics.is_empty() {
            let _ = url.query_pairs_mut().append_pair("topics", &topics.join(","));
        }

        let resumed_from = *self.shared.last_event_id.lock();
        let mut request = self.http.get(url).bearer_auth(&self.config.token);
        if let Some(id) = resumed_from {
            request = request.header("last-event-id", id.to_string());
        }

        let timeout = self.config.connect_timeout;
        let handshake = async {
            let resp = control::check_status(request.send().await?).await?;
            let mut frames = decoder::decode_frames(resp.bytes_stream());
            let sentinel = loop {
                match frames.next().await {
                    Some(Ok(Frame::Comment(_))) => {}
                    Some(Ok(Frame::Message(message))) => break message,
                    Some(Err(error)) => return Err(ClientError::Io(error)),
                    None => return Err(ClientError::Handshake("stream ended".into())),
                }
            };
            if sentinel.event.as_deref() != Some(CONNECTED_EVENT) {
                return Err(ClientError::Handshake(format!(
                    "expected connected frame, got {:?}",
                    sentinel.event
                )));
            }
            let connection_id = serde_json::from_str::<Sentinel>(&sentinel.data)
                .map(|s| s.connection_id)
                .unwrap_or_default();
            Ok::<_, ClientError>((frames, connection_id))
        };
        let (frames, connection_id) = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| ClientError::Handshake(format!("no connected frame within {timeout:?}")))??;

        Ok((
            frames,
            ConnectReport {
                connection_id,
                resumed_from,
                ..ConnectReport::default()
            },
        ))
    }

    fn spawn_reader(&self, mut frames: FrameStream, generation: u64) {
        let shared = Arc::clone(&self.shared);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    next = frames.next() => match next {
                        Some(Ok(Frame::Message(message))) => shared.handle_message(message),
                        Some(Ok(Frame::Comment(_))) => {}
                        Some(Err(error)) => {
                            debug!(error = %error, "stream read failed");
                            break;
                        }
                        None => break,
                    },
                }
            }
            // a newer connect() owns the state now
            if shared.transition(generation, ConnectionState::Disconnected, true) {
                info!("stream disconnected");
            }
        });
        *self.reader.lock() = Some(Reader { cancel, task });
    }

    async fn reassert_topics(&self, mut report: ConnectReport) -> ConnectReport {
        let topics: Vec<Topic> = self.desired.lock().iter().cloned().collect();
        for topic in topics {
            match self.control.join(&topic).await {
                Ok(_) => report.joined.push(topic),
                Err(error) => {
                    warn!(topic = %topic, error = %error, "re-join failed");
                    report.failed.push((topic, error.to_string()));
                }
            }
        }
        report
    }

    fn stop_reader(&self) -> bool {
        let Some(reader) = self.reader.lock().take() else {
            return false;
        };
        reader.cancel.cancel();
        reader.task.abort();
        true
    }

    /// Close the stream. The desired topic set and resume marker are kept.
    pub fn disconnect(&self) {
        let _ = self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if self.stop_reader() {
            debug!("stream closed by client");
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Join `topic` now and on every future connect.
    ///
    /// The id must pass [`Topic::validate`] so that the topic can be listed
    /// on reconnect. The desired set changes only if the control-plane call
    /// succeeds.
    pub async fn join_topic(&self, topic: Topic) -> Result<SubscriptionAck, ClientError> {
        topic.validate()?;
        let ack = self.control.join(&topic).await?;
        let _ = self.desired.lock().insert(topic);
        Ok(ack)
    }

    /// Leave `topic`. The desired set changes only on success.
    pub async fn leave_topic(&self, topic: &Topic) -> Result<SubscriptionAck, ClientError> {
        let ack = self.control.leave(topic).await?;
        let _ = self.desired.lock().remove(topic);
        Ok(ack)
    }

    /// Tells a thread that `name` started typing.
    pub async fn typing_start(&self, thread_id: &str, name: &str) -> Result<(), ClientError> {
        self.control.typing(thread_id, name, true).await
    }

    /// Tells a thread that `name` stopped typing.
    pub async fn typing_stop(&self, thread_id: &str, name: &str) -> Result<(), ClientError> {
        self.control.typing(thread_id, name, false).await
    }

    /// Register a listener for one event type.
    pub fn on<F>(&self, event_type: EventType, callback: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.on(event_type, callback)
    }

    /// Register a connection state listener.
    pub fn on_state<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.shared.listeners.on_state(callback)
    }

    /// Removes a listener. Returns false if it was already gone.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// Desired topics, sorted.
    pub fn desired_topics(&self) -> Vec<Topic> {
        self.desired.lock().iter().cloned().collect()
    }

    /// Highest id seen on the stream, sent as the resume marker.
    pub fn last_event_id(&self) -> Option<Sequence> {
        *self.shared.last_event_id.lock()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Shorthand for `state() == ConnectionState::Connected`.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        let _ = self.stop_reader();
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("base_url", &self.base_url.as_str())
            .field("state", &self.state())
            .field("desired", &self.desired.lock().len())
            .field("last_event_id", &self.last_event_id())
            .finish_non_exhaustive()
    }
}

fn build_http(config: &ClientConfig) -> Result<reqwest::Client, ClientError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .build()?)
}

/// Parse the base URL so that relative joins append rather than replace the
/// last path segment.
fn parse_base(raw: &str) -> Result<Url, ClientError> {
    let normalized = if raw.ends_with('/') {
        raw.to_owned()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|e| ClientError::InvalidUrl(format!("{raw}: {e}")))
}
