//! Error types for the login sequence.
//!
//! Handshake errors describe what the server said, never what the socket did:
//! transport failures are reported by the driver that owns the socket.

use thiserror::Error;

use crate::handshake::HandshakeState;

/// Errors raised while driving the [`Handshake`](crate::Handshake).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Server sent something other than the prompt this step expects
    #[error("unexpected message in {state:?}: expected {expected:?}, received {received:?}")]
    UnexpectedPrompt {
        /// Step the handshake was in
        state: HandshakeState,
        /// Prompt that step waits for
        expected: String,
        /// What actually arrived, lossily decoded
        received: String,
    },

    /// Server rejected the login name or credential hash
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Server speaks an incompatible protocol revision
    #[error("version mismatch: {0}")]
    VersionMismatch(String),

    /// Server refused the login for another reason
    #[error("login rejected: {0}")]
    Rejected(String),

    /// Message fed to a handshake that already finished
    #[error("handshake already {state:?}")]
    InvalidState {
        /// Terminal state the handshake is in
        state: HandshakeState,
    },
}
