//! Session lifecycle states.
//!
//! ```text
//! ┌──────────────┐ connect ┌────────────┐ socket open ┌────────────────┐
//! │ Disconnected │────────>│ Connecting │────────────>│ Authenticating │
//! └──────────────┘         └────────────┘             └────────────────┘
//!        ↑                       │ error                      │
//!        │<──────────────────────┘                            │ accepted
//!        │<───────────────────────── error ───────────────────┤
//!        │                                                    ↓
//!        │  closed  ┌───────────────┐  teardown        ┌───────────┐
//!        └──────────│ Disconnecting │<─────────────────│ Connected │
//!                   └───────────────┘                  └───────────┘
//! ```
//!
//! Only the client facade moves between states; every other component reads
//! the current value.

use std::fmt;

/// Lifecycle state of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No sockets open
    #[default]
    Disconnected,
    /// Opening the control socket
    Connecting,
    /// Running the login sequence on the control socket
    Authenticating,
    /// Handshake done, event worker running
    Connected,
    /// Teardown in progress
    Disconnecting,
}

impl SessionState {
    /// Whether moving from `self` to `next` follows the lifecycle.
    ///
    /// Any state short of `Connected` may fall straight back to
    /// `Disconnected` on error; a connected session always passes through
    /// `Disconnecting`.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Authenticating)
                | (Self::Authenticating, Self::Connected)
                | (Self::Connected, Self::Disconnecting)
                | (Self::Connecting | Self::Authenticating | Self::Disconnecting, Self::Disconnected)
        )
    }

    /// True once the session is usable for commands
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// True while a connect attempt is in progress
    pub fn is_establishing(self) -> bool {
        matches!(self, Self::Connecting | Self::Authenticating)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}
