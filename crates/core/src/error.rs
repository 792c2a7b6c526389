//! Client error model.

use serde_json::Value;
use thiserror::Error;

/// Result type used across the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Status code reported for exchanges that never received an HTTP status.
pub const NO_STATUS: u16 = 0;

/// Error produced by a remote operation or by client misconfiguration.
///
/// Only [`ClientError::Timeout`] carries no payload at all; the retry policy
/// relies on that distinction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClientError {
    /// The requested feature is unavailable (e.g. custom headers under the
    /// constrained transport) or the client was set up incorrectly.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The client-side timeout expired before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// The service answered with a status other than 200, or the connection
    /// failed before any status was received (`status == 0`).
    #[error("server error (status {status})")]
    Server { status: u16, body: Option<Value> },

    /// A 200 response did not have the expected shape (e.g. a job object
    /// without an id).
    #[error("malformed response: {0}")]
    Decode(String),

    /// The call sat in the backlog and was removed before being sent.
    #[error("queued call was dropped before dispatch")]
    Dropped,
}

impl ClientError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn server(status: u16, body: Option<Value>) -> Self {
        Self::Server { status, body }
    }

    /// Connection-level failure: no HTTP status, no body.
    pub fn network() -> Self {
        Self::Server {
            status: NO_STATUS,
            body: None,
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// HTTP status of the failed exchange, if the error came from one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClientError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Structured error body sent by the service, if any.
    pub fn body(&self) -> Option<&Value> {
        match self {
            ClientError::Server { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout)
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ClientError::Configuration(_))
    }
}
