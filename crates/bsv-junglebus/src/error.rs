//! Error types for JungleBus operations.

use std::fmt;

/// Errors that can occur when interacting with the JungleBus API or its
/// subscription transport.
#[derive(Debug, thiserror::Error)]
pub enum JungleBusError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Failed to serialize or deserialize data.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Server returned a non-2xx response.
    #[error("server error ({status_code}): {message}")]
    ServerError {
        /// HTTP status code.
        status_code: u16,
        /// Error message from server.
        message: String,
    },

    /// Resource not found (404).
    #[error("not found")]
    NotFound,

    /// A protobuf publication could not be decoded.
    #[error("protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    /// A base64 field in a JSON publication could not be decoded.
    #[error("base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    /// The subscription transport reported a failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A subscription was created outside a tokio runtime.
    #[error("no tokio runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    /// No live handle exists for the requested channel.
    #[error("not subscribed to {0}")]
    NotSubscribed(String),
}

/// Category of a [`SubscriptionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A publication payload was malformed.
    Decode,
    /// The transport reported a connectivity or auth failure on a channel.
    Transport,
    /// The server sent a control message with the `ERROR` status code.
    Server,
    /// Fetching a transaction body out of band failed.
    Fetch,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Decode => "decode",
            Self::Transport => "transport",
            Self::Server => "server",
            Self::Fetch => "fetch",
        };
        write!(f, "{s}")
    }
}

/// Error delivered to a subscription's `on_error` handler.
///
/// None of these are fatal: the subscription stays attached after reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionError {
    /// Channel the error was observed on.
    pub channel: String,
    /// What kind of failure this is.
    pub kind: ErrorKind,
    /// Short error type. For server errors this is the server's status text.
    pub error_type: String,
    /// Numeric code (server status code or transport error code, 0 if none).
    pub code: u32,
    /// Human-readable description.
    pub message: String,
}

impl SubscriptionError {
    /// Build an error of the given kind from a library error.
    pub fn from_error(channel: &str, kind: ErrorKind, err: &JungleBusError) -> Self {
        Self {
            channel: channel.to_string(),
            kind,
            error_type: kind.to_string(),
            code: 0,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error on {} ({}): {}",
            self.kind, self.channel, self.error_type, self.message
        )
    }
}

impl std::error::Error for SubscriptionError {}
