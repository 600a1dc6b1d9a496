//! Control-plane calls: join, leave, typing.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use switchboard_core::Topic;
use tracing::debug;

use crate::error::ClientError;

/// Server acknowledgement of a join or leave.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SubscriptionAck {
    /// Topic key acted on.
    pub topic: String,
    /// Whether the stream is now subscribed.
    pub subscribed: bool,
    /// Whether the caller had an open stream.
    pub connected: bool,
}

/// The calls the subscription manager makes outside the stream.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Subscribe the caller's stream to `topic`.
    async fn join(&self, topic: &Topic) -> Result<SubscriptionAck, ClientError>;
    /// Unsubscribe the caller's stream from `topic`.
    async fn leave(&self, topic: &Topic) -> Result<SubscriptionAck, ClientError>;
    /// Publish a typing signal on a thread.
    async fn typing(&self, thread_id: &str, name: &str, typing: bool) -> Result<(), ClientError>;
}

/// [`ControlPlane`] over the server's HTTP API.
#[derive(Clone, Debug)]
pub struct HttpControlPlane {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl HttpControlPlane {
    /// Control plane rooted at `base_url`, authenticated with `token`.
    pub fn new(http: reqwest::Client, base_url: Url, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url,
            token: token.into(),
        }
    }

    /// `{base}/api/{orgs|threads}/{id}/{action...}` with the id as one
    /// percent-encoded segment.
    pub fn topic_url(&self, topic: &Topic, action: &[&str]) -> Result<Url, ClientError> {
        let family = match topic {
            Topic::Org(_) => "orgs",
            Topic::Thread(_) => "threads",
        };
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| ClientError::InvalidUrl(self.base_url.to_string()))?;
            let _ = segments
                .pop_if_empty()
                .extend(["api", family, topic.id()])
                .extend(action);
        }
        Ok(url)
    }

    async fn post(&self, url: Url, body: Option<serde_json::Value>) -> Result<reqwest::Response, ClientError> {
        let mut request = self.http.post(url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        check_status(request.send().await?).await
    }

    async fn subscription_call(&self, topic: &Topic, action: &str) -> Result<SubscriptionAck, ClientError> {
        let url = self.topic_url(topic, &[action])?;
        let ack: SubscriptionAck = self.post(url, None).await?.json().await?;
        debug!(topic = %topic, action, connected = ack.connected, "control call acknowledged");
        Ok(ack)
    }
}

/// Turn a non-success response into [`ClientError::Status`].
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (Some(body.error.code), body.error.message),
        Err(_) => (None, text),
    };
    Err(ClientError::Status {
        status: status.as_u16(),
        code,
        message,
    })
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn join(&self, topic: &Topic) -> Result<SubscriptionAck, ClientError> {
        self.subscription_call(topic, "join").await
    }

    async fn leave(&self, topic: &Topic) -> Result<SubscriptionAck, ClientError> {
        self.subscription_call(topic, "leave").await
    }

    async fn typing(&self, thread_id: &str, name: &str, typing: bool) -> Result<(), ClientError> {
        let action = if typing { "start" } else { "stop" };
        let url = self.topic_url(&Topic::thread(thread_id), &["typing", action])?;
        let _ = self.post(url, Some(json!({ "name": name }))).await?;
        Ok(())
    }
}
