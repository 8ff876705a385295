//! Protocol
//!
//! Wire format for the instrument-control daemon protocol. Everything here is
//! pure byte manipulation: no sockets, no threads, no clocks.
//!
//! # Components
//!
//! - [`Codec`]: encodes and decodes single messages in one of two
//!   [`WireMode`]s (terminator-delimited or length-prefixed compressed)
//! - [`Message`]: an opaque payload tagged with its [`MessageKind`]
//! - [`Reply`]: classification of control-channel replies (acknowledgement,
//!   warning, error, data)
//! - [`wire`]: fixed prompt strings, tokens and markers of the protocol

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod codec;
mod errors;
mod event;
mod message;
mod reply;
pub mod wire;

pub use codec::{Codec, DEFAULT_MAX_MESSAGE_SIZE, WireMode};
pub use errors::{ProtocolError, Result};
pub use event::split_event_line;
pub use message::{Message, MessageKind};
pub use reply::Reply;
