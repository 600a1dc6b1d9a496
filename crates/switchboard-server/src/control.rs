//! Topic control plane: join/leave rooms and threads, typing signals.
//!
//! Every call acts on the caller's own stream. Joining or leaving while no
//! stream is open is not an error; the response reports `connected: false`
//! and the client re-asserts its topics on the next connect.

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use switchboard_core::{Identity, Sequence, Topic};
use tracing::debug;

use crate::auth::Authenticated;
use crate::error::ApiError;
use crate::server::AppState;

/// Result of a join or leave call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    /// Topic key acted on.
    pub topic: String,
    /// Whether the caller's stream is now subscribed to the topic.
    pub subscribed: bool,
    /// Whether the caller had an open stream.
    pub connected: bool,
}

/// Body of the typing endpoints.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TypingRequest {
    /// Display name shown to other participants.
    #[serde(default)]
    pub name: String,
}

/// Payload of a `typing_signal` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    /// Thread the signal belongs to.
    pub thread_id: String,
    /// Who is typing.
    pub identity: Identity,
    /// Display name from the request body.
    pub name: String,
    /// `true` on start, `false` on stop.
    pub typing: bool,
}

/// Result of a typing call.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingResponse {
    /// Topic key the signal was published on.
    pub topic: String,
    /// Echo of the requested state.
    pub typing: bool,
    /// Sequence number of the published signal, absent if publishing failed.
    pub event_id: Option<Sequence>,
}

fn require_id(id: &str) -> Result<(), ApiError> {
    Topic::validate_id(id).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn join(state: &AppState, identity: &Identity, topic: &Topic) -> SubscriptionResponse {
    let key = topic.key();
    let connected = state.broker.subscribe_topic(identity, &key);
    debug!(identity = %identity, topic = %key, connected, "join");
    SubscriptionResponse {
        topic: key,
        subscribed: connected,
        connected,
    }
}

fn leave(state: &AppState, identity: &Identity, topic: &Topic) -> SubscriptionResponse {
    let key = topic.key();
    let connected = state.broker.unsubscribe_topic(identity, &key);
    debug!(identity = %identity, topic = %key, connected, "leave");
    SubscriptionResponse {
        topic: key,
        subscribed: false,
        connected,
    }
}

/// POST /api/orgs/{id}/join
pub(crate) async fn join_org(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(org_id): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    require_id(&org_id)?;
    Ok(Json(join(&state, &identity, &Topic::org(org_id))))
}

/// POST /api/orgs/{id}/leave
pub(crate) async fn leave_org(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(org_id): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    require_id(&org_id)?;
    Ok(Json(leave(&state, &identity, &Topic::org(org_id))))
}

/// POST /api/threads/{id}/join
pub(crate) async fn join_thread(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(thread_id): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    require_id(&thread_id)?;
    Ok(Json(join(&state, &identity, &Topic::thread(thread_id))))
}

/// POST /api/threads/{id}/leave
pub(crate) async fn leave_thread(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(thread_id): Path<String>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    require_id(&thread_id)?;
    Ok(Json(leave(&state, &identity, &Topic::thread(thread_id))))
}

fn typing(state: &AppState, identity: Identity, thread_id: String, name: String, typing: bool) -> TypingResponse {
    let topic = Topic::thread(thread_id.clone());
    let event_id = state.publisher.emit_typing_signal(
        &topic,
        TypingPayload {
            thread_id,
            identity,
            name,
            typing,
        },
    );
    TypingResponse {
        topic: topic.key(),
        typing,
        event_id,
    }
}

/// POST /api/threads/{id}/typing/start
pub(crate) async fn typing_start(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(thread_id): Path<String>,
    Json(body): Json<TypingRequest>,
) -> Result<Json<TypingResponse>, ApiError> {
    require_id(&thread_id)?;
    Ok(Json(typing(&state, identity, thread_id, body.name, true)))
}

/// POST /api/threads/{id}/typing/stop
pub(crate) async fn typing_stop(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(thread_id): Path<String>,
    Json(body): Json<TypingRequest>,
) -> Result<Json<TypingResponse>, ApiError> {
    require_id(&thread_id)?;
    Ok(Json(typing(&state, identity, thread_id, body.name, false)))
}
