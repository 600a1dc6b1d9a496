//! Client errors.

use thiserror::Error;

/// Errors returned by the subscription manager and control-plane client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure talking to the server.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error code from the response body, if any.
        code: Option<String>,
        /// Human-readable message.
        message: String,
    },
    /// The stream did not start with the `connected` frame.
    #[error("stream did not confirm connection: {0}")]
    Handshake(String),
    /// The base URL cannot be used to build request URLs.
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
    /// I/O error while reading the stream.
    #[error("stream read error: {0}")]
    Io(#[from] std::io::Error),
    /// The topic cannot be joined.
    #[error(transparent)]
    InvalidTopic(#[from] switchboard_core::ParseError),
}

impl ClientError {
    /// Whether the server rejected the credential.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }
}
