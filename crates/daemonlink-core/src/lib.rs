//! Session core
//!
//! Protocol logic above the framing layer and below the sockets: the login
//! sequence, the session lifecycle and credential hashing. Nothing here does
//! I/O; drivers feed received messages in and execute the returned actions.
//!
//! # Components
//!
//! - [`Handshake`]: prompt/response state machine that ends with the server
//!   version or a typed [`HandshakeError`]
//! - [`SessionState`]: lifecycle states and their allowed transitions
//! - [`Secret`] and [`hash_secret`]: the credential and its one-way wire form
//!
//! # Security
//!
//! The plaintext secret is held in zeroizing memory and only ever used as HMAC
//! input. What goes on the wire is `hex(HMAC-SHA256(login, secret))`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod credentials;
pub mod error;
pub mod handshake;
pub mod session;

pub use credentials::{Secret, hash_secret};
pub use error::HandshakeError;
pub use handshake::{Handshake, HandshakeAction, HandshakeState};
pub use session::SessionState;
