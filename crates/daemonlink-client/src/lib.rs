//! Client
//!
//! Blocking client for the instrument-control daemon protocol: authenticates,
//! issues synchronous commands, and delivers server-pushed events to
//! registered observers for the lifetime of a session.
//!
//! # Architecture
//!
//! Two TCP connections per session, opened in this order:
//!
//! ```text
//!            ┌──────────────────────────── Client ────────────────────────────┐
//!  caller ──>│ CommandChannel ── Channel (control) ──> login, commands, exit  │
//!            │                                                                │
//! observers <│ EventWorker    <── Channel (event)  <── "<name> <payload>\n"   │
//!            └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The login sequence is the Sans-IO [`daemonlink_core::Handshake`]; this
//! crate only drives it over a socket. Commands run on the caller's thread
//! under one lock; events run on one worker thread per session.
//!
//! # Components
//!
//! - [`Client`]: connect, commands, disconnect, observer registration
//! - [`Channel`]: one TCP connection with a [`daemonlink_proto::Codec`]
//! - [`CommandChannel`]: mutual exclusion over request/reply pairs
//! - [`Observers`]: registration table for events and lifecycle callbacks
//! - [`PayloadCodec`]: pluggable event payload decoding
//!
//! # Example
//!
//! ```no_run
//! use daemonlink_client::{Client, ClientConfig, ConnectionDescriptor};
//!
//! let client = Client::new(ClientConfig::default());
//! client.on("message", |name, value| {
//!     tracing::info!(%name, %value, "event");
//! });
//! client.connect(&ConnectionDescriptor::new("daemon.local", 1301, "guest", "secret"))?;
//! let status = client.query(b"get_status")?;
//! client.disconnect();
//! # drop(status);
//! # Ok::<(), daemonlink_client::ClientError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod command;
mod config;
mod error;
mod event;
mod observer;
mod payload;
mod transport;

pub use client::Client;
pub use command::CommandChannel;
pub use config::{
    ClientConfig, ConnectionDescriptor, DEFAULT_CONNECT_TIMEOUT, DEFAULT_DISCONNECT_TIMEOUT,
    DEFAULT_DISPLAY,
};
pub use daemonlink_core::{Secret, SessionState};
pub use error::{ClientError, TransportError};
pub use observer::{DisconnectReason, EventFilter, ObserverHandle, Observers};
pub use payload::{JsonPayloads, PayloadCodec, PayloadError, RawPayloads};
pub use serde_json::Value;
pub use transport::{Channel, CloseHandle, MessageIo};
