//! Logical messages exchanged on either channel.

use bytes::Bytes;

/// Direction and purpose of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Client request on the control channel
    Command,
    /// Server answer on the control channel
    Reply,
    /// Server-pushed notification on the event channel
    Event,
}

/// An opaque payload plus its logical kind.
///
/// The codec never looks inside `payload`; interpretation happens in the
/// handshake, the command channel or the event worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// What the message is
    pub kind: MessageKind,
    /// Raw bytes without any framing
    pub payload: Bytes,
}

impl Message {
    /// Create a message of the given kind
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self { kind, payload: payload.into() }
    }

    /// Client request
    pub fn command(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Command, payload)
    }

    /// Server answer
    pub fn reply(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Reply, payload)
    }

    /// Server notification
    pub fn event(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Event, payload)
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True for a zero-length payload
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
