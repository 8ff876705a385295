//! Behaviour knobs for the mock daemon.

use std::time::Duration;

use bytes::Bytes;

/// How the mock answers the credential hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acceptance {
    /// Send the acceptance token
    #[default]
    Accept,
    /// Send `NICOSD WARNING: Invalid login` and hang up
    InvalidCredentials,
    /// Send `NICOSD ERROR: version mismatch` and hang up
    VersionMismatch,
    /// Accept the socket but never send the first prompt
    Silent,
    /// Dribble an endless, never terminated first prompt, one byte per
    /// `interval`
    Trickle {
        /// Delay between bytes
        interval: Duration,
    },
}

/// How the mock answers commands other than the built-in ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReplies {
    /// Send each command back unchanged after `latency`
    Echo {
        /// Delay before every reply
        latency: Duration,
    },
    /// Acknowledge every command
    Ack,
    /// Answer with these replies in order, then acknowledge
    Script(Vec<Bytes>),
    /// Never answer
    Silent,
    /// Dribble an endless, never terminated reply, one byte per `interval`
    Trickle {
        /// Delay between bytes
        interval: Duration,
    },
}

impl Default for CommandReplies {
    fn default() -> Self {
        Self::Echo { latency: Duration::ZERO }
    }
}

/// Mock daemon configuration
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Verdict on the login
    pub acceptance: Acceptance,
    /// Command reply policy
    pub replies: CommandReplies,
    /// Version reported by `get_version`
    pub server_version: String,
    /// Protocol revision reported by `get_version`
    pub protocol: u32,
    /// Read `exit` without answering it, then wait for the client to hang up
    pub ignore_exit: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            acceptance: Acceptance::default(),
            replies: CommandReplies::default(),
            server_version: "2.4.1".to_string(),
            protocol: 1,
            ignore_exit: false,
        }
    }
}

impl MockConfig {
    /// Override the login verdict
    #[must_use]
    pub fn acceptance(mut self, acceptance: Acceptance) -> Self {
        self.acceptance = acceptance;
        self
    }

    /// Override the command reply policy
    #[must_use]
    pub fn replies(mut self, replies: CommandReplies) -> Self {
        self.replies = replies;
        self
    }

    /// Override the advertised protocol revision
    #[must_use]
    pub fn protocol(mut self, protocol: u32) -> Self {
        self.protocol = protocol;
        self
    }

    /// Leave `exit` unanswered
    #[must_use]
    pub fn ignore_exit(mut self) -> Self {
        self.ignore_exit = true;
        self
    }
}
