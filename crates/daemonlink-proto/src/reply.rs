//! Control-channel reply classification.

use bytes::Bytes;

use crate::wire::{ACK, BYE, ERROR_PREFIX, WARNING_PREFIX};

/// A server reply, classified by its leading token.
///
/// The daemon answers every command with exactly one message. Acknowledgements
/// and rejections are recognisable by fixed prefixes; anything else is
/// command-specific data and stays opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Positive acknowledgement
    Ack,
    /// Session termination acknowledged
    Bye,
    /// Negative acknowledgement (recoverable, e.g. "a script is running")
    Warning(String),
    /// Negative acknowledgement caused by a server-side failure
    Error(String),
    /// Command-specific data
    Data(Bytes),
}

impl Reply {
    /// Classify a raw reply payload
    pub fn parse(payload: Bytes) -> Self {
        if payload.as_ref() == ACK {
            return Self::Ack;
        }
        if payload.as_ref() == BYE {
            return Self::Bye;
        }
        if let Some(rest) = payload.strip_prefix(WARNING_PREFIX) {
            return Self::Warning(message_text(rest));
        }
        if let Some(rest) = payload.strip_prefix(ERROR_PREFIX) {
            return Self::Error(message_text(rest));
        }
        Self::Data(payload)
    }

    /// True for a positive acknowledgement
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    /// True for warnings and errors
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Warning(_) | Self::Error(_))
    }

    /// Text of a negative acknowledgement. `None` otherwise.
    pub fn rejection(&self) -> Option<&str> {
        match self {
            Self::Warning(msg) | Self::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

fn message_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end_matches('\n').to_string()
}
