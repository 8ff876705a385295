//! Error types for the client.
//!
//! Two layers: [`TransportError`] describes what happened to one socket, and
//! [`ClientError`] is what callers of the facade see. Conversions between the
//! layers are explicit so that each failure keeps its category.

use std::io;

use daemonlink_core::{HandshakeError, SessionState};
use daemonlink_proto::ProtocolError;
use thiserror::Error;

/// Failures of a single [`Channel`](crate::Channel).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Socket could not be opened
    #[error("cannot connect to {addr}: {reason}")]
    Connect {
        /// Host and port that were tried
        addr: String,
        /// Last OS error
        reason: String,
    },

    /// Read or write failed
    #[error("i/o error: {0}")]
    Io(String),

    /// Channel already closed, or the peer closed it between messages
    #[error("channel closed")]
    Closed,

    /// Deadline passed before the operation finished
    #[error("operation timed out")]
    Timeout,

    /// Byte stream violates the framing rules
    #[error("framing violation: {0}")]
    Framing(#[from] ProtocolError),
}

impl TransportError {
    pub(crate) fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(error.to_string()),
        }
    }
}

/// Errors surfaced by the [`Client`](crate::Client) facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Control or event socket could not be opened
    #[error("connect failed: {0}")]
    Connect(String),

    /// Server rejected the credentials
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Server speaks an incompatible protocol revision
    #[error("version mismatch: {0}")]
    Version(String),

    /// Unexpected message during login, or a framing violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket read or write failed
    #[error("i/o error: {0}")]
    Io(String),

    /// Operation attempted on a closed channel or a closed session
    #[error("channel closed")]
    Closed,

    /// Command could not complete because the control channel broke
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// Deadline exceeded on connect or on a command
    #[error("timed out")]
    Timeout,

    /// Server answered with a negative acknowledgement
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// Operation not allowed in the current session state
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// State at the time of the call
        state: SessionState,
        /// What was attempted
        operation: &'static str,
    },
}

impl ClientError {
    /// True for failures a host application may reasonably retry.
    ///
    /// The client itself never retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout)
    }
}

impl From<TransportError> for ClientError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Connect { .. } => Self::Connect(error.to_string()),
            TransportError::Io(reason) => Self::Io(reason),
            TransportError::Closed => Self::Closed,
            TransportError::Timeout => Self::Timeout,
            TransportError::Framing(e) => Self::Protocol(e.to_string()),
        }
    }
}

impl From<HandshakeError> for ClientError {
    fn from(error: HandshakeError) -> Self {
        match error {
            HandshakeError::InvalidCredentials(reason) => Self::Auth(reason),
            HandshakeError::VersionMismatch(reason) => Self::Version(reason),
            HandshakeError::Rejected(reason) => Self::Protocol(format!("login rejected: {reason}")),
            other @ (HandshakeError::UnexpectedPrompt { .. }
            | HandshakeError::InvalidState { .. }) => Self::Protocol(other.to_string()),
        }
    }
}
