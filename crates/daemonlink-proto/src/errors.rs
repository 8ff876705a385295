//! Protocol error types.

use thiserror::Error;

/// Result alias for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Framing and wire-format violations.
///
/// Every variant describes malformed bytes, never an I/O condition. A framing
/// violation on a live stream is fatal to that stream: the decoder cannot
/// resynchronise.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload handed to the delimited encoder contains the terminator byte
    #[error("payload contains terminator byte {terminator:#04x} at offset {position}")]
    TerminatorInPayload {
        /// Reserved terminator of the codec
        terminator: u8,
        /// Offset of the first occurrence inside the payload
        position: usize,
    },

    /// A single delimited message has its terminator before the final byte
    #[error("terminator found at offset {position} of a {len}-byte message")]
    TerminatorMidMessage {
        /// Offset of the first terminator
        position: usize,
        /// Total message length including the terminator
        len: usize,
    },

    /// Delimited message ended without its terminator
    #[error("message is not terminated ({buffered} bytes buffered)")]
    Unterminated {
        /// Bytes received so far
        buffered: usize,
    },

    /// Message exceeds the configured size limit
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Claimed or observed size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Framed message shorter than its length prefix claims
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    FrameTruncated {
        /// Bytes promised by the length prefix (or the prefix itself)
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Bytes left over after a complete framed message in one-shot decode
    #[error("{extra} trailing bytes after frame")]
    TrailingBytes {
        /// Number of surplus bytes
        extra: usize,
    },

    /// zlib compression failed
    #[error("compression failed: {0}")]
    Compression(String),

    /// zlib decompression failed
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Event line without a usable event name
    #[error("malformed event line: {0}")]
    MalformedEvent(String),
}
