//! Error types for the connection core.

use std::io::ErrorKind;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for connection operations.
pub type ConnResult<T> = Result<T, ConnError>;

/// A failure reported by the database client while connecting, probing,
/// querying or closing.
///
/// Carries enough structure for kill detection to work without depending
/// on the client library's own error type: the server error number (when
/// the server answered with an error packet) and the I/O error kind (when
/// the transport failed).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    /// Human-readable message as reported by the client.
    pub message: String,
    /// MySQL server error number, e.g. `1927` for `ER_CONNECTION_KILLED`.
    pub code: Option<u16>,
    /// Transport-level failure kind, if the error came from the socket.
    pub io_kind: Option<ErrorKind>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            io_kind: None,
        }
    }

    /// An error answered by the server with the given error number.
    pub fn server(code: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
            io_kind: None,
        }
    }

    /// A transport failure of the given kind.
    pub fn io(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            io_kind: Some(kind),
        }
    }
}

/// Errors surfaced by identity resolution and the connection manager.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The address is not `tcp(host[:port])/` or `unix(path)/`.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The server terminated the cached connection. It has been evicted;
    /// requesting a connection again establishes a fresh one.
    #[error("connection to {0} was killed by the server")]
    ConnectionKilled(String),

    /// The record no longer holds a live handle.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// A network operation exceeded the request timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The manager has been shut down and accepts no new requests.
    #[error("connection manager is shutting down")]
    ShuttingDown,

    /// Passthrough of the database client error.
    #[error("database error: {0}")]
    Backend(#[from] BackendError),
}

impl ConnError {
    /// Whether a retry is expected to obtain a fresh connection.
    pub fn is_killed(&self) -> bool {
        matches!(self, ConnError::ConnectionKilled(_))
    }
}
