//! Wire frames written to the event stream.
//!
//! ```text
//! event: connected
//! data: {"connectionId":"conn_...","lastEventId":41}
//!
//! event: new_message
//! id: 42
//! data: {"threadId":"t1","body":"hi"}
//!
//! : keepalive
//! ```
//!
//! Replayed frames sit between the sentinel and the first live frame and
//! look the same as live ones. They are only written for topics listed in
//! the stream's `topics` parameter.

use axum::response::sse::Event as SseEvent;
use serde_json::json;
use switchboard_core::{ConnectionId, Event, Sequence};
use tracing::warn;

/// Name of the sentinel frame written once when a stream opens.
pub const CONNECTED_EVENT: &str = "connected";

/// Comment text of the keepalive frame.
pub const KEEPALIVE_COMMENT: &str = "keepalive";

/// Sentinel frame. Carries no `id:` so it never moves a client's resume marker.
pub fn connected_frame(connection_id: &ConnectionId, last_event_id: Sequence) -> SseEvent {
    SseEvent::default().event(CONNECTED_EVENT).data(
        json!({
            "connectionId": connection_id,
            "lastEventId": last_event_id,
        })
        .to_string(),
    )
}

/// `event:` / `id:` / `data:` frame for a published event.
pub fn event_frame(event: &Event) -> Option<SseEvent> {
    match SseEvent::default()
        .event(event.event_type.as_str())
        .id(event.id.to_string())
        .json_data(&event.payload)
    {
        Ok(frame) => Some(frame),
        Err(error) => {
            warn!(event_id = event.id, error = %error, "failed to encode event frame");
            None
        }
    }
}

/// Comment-only frame that keeps idle streams open.
pub fn keepalive_frame() -> SseEvent {
    SseEvent::default().comment(KEEPALIVE_COMMENT)
}
