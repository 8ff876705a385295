//! Test harness for daemonlink.
//!
//! [`MockDaemon`] is an in-process, thread-based stand-in for the
//! instrument-control daemon. It speaks the real wire protocol on loopback
//! sockets: the login prompts, the version banner, compressed framing after
//! `set_gzip` (replies only), and the `exit` farewell. Tests choose the login verdict and the
//! command reply policy through [`MockConfig`], push event lines on demand and
//! inspect every control-channel message through the [`WireEntry`] log.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod daemon;

pub use config::{Acceptance, CommandReplies, MockConfig};
pub use daemon::{MockDaemon, WireEntry};
