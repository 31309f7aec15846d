/// Error types for the Kraken WebSocket client.
///
/// A single enum covers validation failures, transport/serialization
/// failures, server-side operation rejections, and the interruption
/// conditions produced by connection loss.
use std::collections::BTreeMap;

use thiserror::Error;

use crate::models::OrderResponse;

/// The primary error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// A caller-side precondition failed. No wire traffic was produced.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The frame could not be written to the transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A payload could not be serialized or deserialized.
    #[error("JSON error: {0}")]
    Json(String),

    /// The server accepted the request and replied with an error payload.
    ///
    /// For order operations the parsed response body is attached so the
    /// caller still sees the server's description.
    #[error("{operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
        response: Option<Box<OrderResponse>>,
    },

    /// The deadline fired or the connection was lost after the frame was
    /// sent. The outcome on the server is indeterminate; reconcile
    /// out-of-band (for orders, via REST using `userref`).
    #[error("{operation} interrupted before a response was received")]
    OperationInterrupted { operation: &'static str },

    /// At least one pair of a subscribe/unsubscribe request was rejected.
    /// No registry record is installed or removed on a partial failure.
    #[error("{operation} failed for {} pair(s)", .failures.len())]
    Subscription {
        operation: &'static str,
        failures: BTreeMap<String, String>,
    },

    /// Interruption marker delivered on every live subscription stream
    /// exactly once per lost connection. Events resume on the same stream
    /// after the client resubscribes.
    #[error("stream interrupted by connection loss")]
    StreamInterrupted,

    /// The REST collaborator could not produce a websocket token:
    /// transport or HTTP-status failure, or a non-empty server error list.
    #[error("Token error: {0}")]
    Token(String),

    /// An inbound payload could not be classified or correlated.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No transport handle is available for writing.
    #[error("not connected")]
    NotConnected,

    /// The operation requires a client built with credentials.
    #[error("{0} requires a private client")]
    PrivateOnly(&'static str),
}

impl Error {
    /// True when the caller cannot know whether the server processed the
    /// request.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Error::OperationInterrupted { .. })
    }

    /// The parsed order response attached to a server-side rejection.
    pub fn order_response(&self) -> Option<&OrderResponse> {
        match self {
            Error::Operation { response, .. } => response.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Token(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Validation(format!("URL parse error: {err}"))
    }
}
