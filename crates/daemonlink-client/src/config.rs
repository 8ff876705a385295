//! Client configuration and the connection descriptor.

use std::time::Duration;

use daemonlink_core::Secret;
use daemonlink_proto::DEFAULT_MAX_MESSAGE_SIZE;

/// Deadline for opening the control socket and completing the login.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the polite session-termination exchange.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Display identity sent when the descriptor does not name one.
pub const DEFAULT_DISPLAY: &str = ":0";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Deadline for socket open plus handshake
    pub connect_timeout: Duration,
    /// Per-command reply deadline. `None` waits forever.
    pub command_timeout: Option<Duration>,
    /// Bound on the `exit` exchange during a requested disconnect
    pub disconnect_timeout: Duration,
    /// Switch the control channel to compressed length-prefixed framing
    /// after login
    pub compressed_framing: bool,
    /// Largest message accepted on either channel
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: None,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            compressed_framing: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Where to connect and as whom. Immutable for the life of a session.
///
/// `Debug` output never includes the secret.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    /// Server host name or address
    pub host: String,
    /// Server port, shared by the control and event sockets
    pub port: u16,
    /// Display identity answered to the first prompt
    pub display: String,
    /// Login name
    pub login: String,
    /// Credential secret; only its keyed hash is sent
    pub secret: Secret,
}

impl ConnectionDescriptor {
    /// Descriptor with the default display identity
    pub fn new(
        host: impl Into<String>,
        port: u16,
        login: impl Into<String>,
        secret: impl Into<Secret>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            display: DEFAULT_DISPLAY.to_string(),
            login: login.into(),
            secret: secret.into(),
        }
    }

    /// Override the display identity
    #[must_use]
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = display.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_debug_redacts_secret() {
        let descriptor = ConnectionDescriptor::new("localhost", 1301, "alice", "hunter2");
        let rendered = format!("{descriptor:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.command_timeout, None);
        assert!(!config.compressed_framing);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }
}
