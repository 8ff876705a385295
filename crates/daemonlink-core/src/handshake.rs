//! Login sequence state machine.
//!
//! Uses the action pattern: the driver feeds every control-channel message to
//! [`Handshake::handle_message`] and executes the returned actions. The state
//! machine never touches a socket, so the whole sequence is testable with byte
//! strings.
//!
//! # State Machine
//!
//! ```text
//! ┌────────────────────┐ "display" ┌──────────────────┐ "login: " ┌─────────────────────┐
//! │ AwaitDisplayPrompt │──────────>│ AwaitLoginPrompt │──────────>│ AwaitPasswordPrompt │
//! └────────────────────┘           └──────────────────┘           └─────────────────────┘
//!                                                                            │ "passwd: "
//!                                                                            ↓
//!            ┌──────┐  version banner  ┌──────────────┐   acceptance  ┌─────────────────┐
//!            │ Done │<─────────────────│ AwaitVersion │<──────────────│ AwaitAcceptance │
//!            └──────┘                  └──────────────┘               └─────────────────┘
//! ```
//!
//! Any unexpected message or negative reply moves to `Failed`.

use bytes::Bytes;
use daemonlink_proto::{
    Reply,
    wire::{
        ACK, DISPLAY_PROMPT, INVALID_CREDENTIALS_MARKER, LOGIN_PROMPT, PASSWORD_PROMPT,
        PROTOCOL_MARKER, PROTOCOL_VERSION, VERSION_COMMAND, VERSION_MISMATCH_MARKER,
        VERSION_REPLY_PREFIX,
    },
};

use crate::{
    credentials::{Secret, hash_secret},
    error::HandshakeError,
};

/// Actions returned by the handshake state machine.
///
/// - `Send`: write these bytes as one control-channel message
/// - `Complete`: the session is established
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Send this payload to the server
    Send(Bytes),

    /// Login accepted and protocol revision confirmed
    Complete {
        /// Version string reported by the server
        server_version: String,
    },
}

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Waiting for the display prompt
    AwaitDisplayPrompt,
    /// Display sent, waiting for the login prompt
    AwaitLoginPrompt,
    /// Login sent, waiting for the password prompt
    AwaitPasswordPrompt,
    /// Credential hash sent, waiting for the verdict
    AwaitAcceptance,
    /// Version query sent, waiting for the banner
    AwaitVersion,
    /// Session established
    Done,
    /// Login failed; the control socket must be closed
    Failed,
}

impl HandshakeState {
    /// True for `Done` and `Failed`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Client side of the login sequence.
///
/// Holds only the hash of the secret, computed once at construction.
#[derive(Debug, Clone)]
pub struct Handshake {
    state: HandshakeState,
    display: String,
    login: String,
    credential_hash: String,
    server_version: Option<String>,
}

impl Handshake {
    /// Create a handshake in [`HandshakeState::AwaitDisplayPrompt`]
    pub fn new(display: impl Into<String>, login: impl Into<String>, secret: &Secret) -> Self {
        let login = login.into();
        let credential_hash = hash_secret(&login, secret);
        Self {
            state: HandshakeState::AwaitDisplayPrompt,
            display: display.into(),
            login,
            credential_hash,
            server_version: None,
        }
    }

    /// Current state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Server version, available once `Done`
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    /// Process one message received from the server.
    ///
    /// # Errors
    ///
    /// - `HandshakeError::UnexpectedPrompt` if the message is not what the
    ///   current step waits for
    /// - `HandshakeError::InvalidCredentials` if the server rejected the login
    /// - `HandshakeError::VersionMismatch` if the server reports, or the banner
    ///   shows, an incompatible protocol
    /// - `HandshakeError::Rejected` for any other negative reply
    /// - `HandshakeError::InvalidState` if the handshake already finished
    ///
    /// Every error except `InvalidState` moves the handshake to `Failed`.
    pub fn handle_message(
        &mut self,
        payload: &[u8],
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        let result = self.step(payload);
        if result.is_err() && !self.state.is_terminal() {
            tracing::debug!(state = ?self.state, "handshake failed");
            self.state = HandshakeState::Failed;
        }
        result
    }

    fn step(&mut self, payload: &[u8]) -> Result<Vec<HandshakeAction>, HandshakeError> {
        match self.state {
            HandshakeState::AwaitDisplayPrompt => {
                self.expect_prompt(payload, DISPLAY_PROMPT)?;
                Ok(self.advance(HandshakeState::AwaitLoginPrompt, self.display.clone()))
            },
            HandshakeState::AwaitLoginPrompt => {
                self.expect_prompt(payload, LOGIN_PROMPT)?;
                Ok(self.advance(HandshakeState::AwaitPasswordPrompt, self.login.clone()))
            },
            HandshakeState::AwaitPasswordPrompt => {
                self.expect_prompt(payload, PASSWORD_PROMPT)?;
                Ok(self.advance(HandshakeState::AwaitAcceptance, self.credential_hash.clone()))
            },
            HandshakeState::AwaitAcceptance => self.handle_verdict(payload),
            HandshakeState::AwaitVersion => self.handle_banner(payload),
            state @ (HandshakeState::Done | HandshakeState::Failed) => {
                Err(HandshakeError::InvalidState { state })
            },
        }
    }

    fn advance(&mut self, next: HandshakeState, response: String) -> Vec<HandshakeAction> {
        tracing::debug!(from = ?self.state, to = ?next, "handshake step");
        self.state = next;
        vec![HandshakeAction::Send(Bytes::from(response))]
    }

    fn expect_prompt(&self, payload: &[u8], prompt: &[u8]) -> Result<(), HandshakeError> {
        if payload == prompt {
            return Ok(());
        }
        Err(HandshakeError::UnexpectedPrompt {
            state: self.state,
            expected: String::from_utf8_lossy(prompt).into_owned(),
            received: String::from_utf8_lossy(payload).into_owned(),
        })
    }

    fn handle_verdict(&mut self, payload: &[u8]) -> Result<Vec<HandshakeAction>, HandshakeError> {
        if payload == ACK {
            tracing::debug!(login = %self.login, "login accepted");
            self.state = HandshakeState::AwaitVersion;
            return Ok(vec![HandshakeAction::Send(Bytes::from_static(VERSION_COMMAND))]);
        }

        let reply = Reply::parse(Bytes::copy_from_slice(payload));
        let Some(reason) = reply.rejection() else {
            return Err(self.unexpected(payload, ACK));
        };

        if payload.starts_with(INVALID_CREDENTIALS_MARKER) {
            Err(HandshakeError::InvalidCredentials(reason.to_string()))
        } else if payload.starts_with(VERSION_MISMATCH_MARKER) {
            Err(HandshakeError::VersionMismatch(reason.to_string()))
        } else {
            Err(HandshakeError::Rejected(reason.to_string()))
        }
    }

    fn handle_banner(&mut self, payload: &[u8]) -> Result<Vec<HandshakeAction>, HandshakeError> {
        let Some(banner) = payload.strip_prefix(VERSION_REPLY_PREFIX) else {
            let reply = Reply::parse(Bytes::copy_from_slice(payload));
            if let Some(reason) = reply.rejection() {
                return Err(HandshakeError::Rejected(reason.to_string()));
            }
            return Err(self.unexpected(payload, VERSION_REPLY_PREFIX));
        };

        let banner = String::from_utf8_lossy(banner);
        let banner = banner.trim_end();
        let (server_version, protocol) = parse_banner(banner);

        if protocol != Some(PROTOCOL_VERSION) {
            return Err(HandshakeError::VersionMismatch(format!(
                "server reports {banner:?}, client speaks protocol {PROTOCOL_VERSION}"
            )));
        }

        tracing::debug!(server_version = %server_version, "protocol confirmed");
        self.state = HandshakeState::Done;
        self.server_version = Some(server_version.clone());
        Ok(vec![HandshakeAction::Complete { server_version }])
    }

    fn unexpected(&self, payload: &[u8], expected: &[u8]) -> HandshakeError {
        HandshakeError::UnexpectedPrompt {
            state: self.state,
            expected: String::from_utf8_lossy(expected).into_owned(),
            received: String::from_utf8_lossy(payload).into_owned(),
        }
    }
}

/// Split `<version> (<name>), supports protocol <n>` into its parts.
///
/// The version is everything up to the first space or comma. The protocol is
/// `None` when the marker is missing or not followed by a number.
fn parse_banner(banner: &str) -> (String, Option<u32>) {
    let version = banner
        .split(|c: char| c.is_whitespace() || c == ',')
        .next()
        .unwrap_or_default()
        .to_string();

    let protocol = banner.find(PROTOCOL_MARKER).and_then(|at| {
        let digits: String = banner[at + PROTOCOL_MARKER.len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    });

    (version, protocol)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANNER: &[u8] = b"nicosd version: 2.4.1 (licosd), supports protocol 1\n";

    fn handshake() -> Handshake {
        Handshake::new(":0", "alice", &Secret::new("hunter2"))
    }

    fn sent(actions: &[HandshakeAction]) -> &[u8] {
        match actions {
            [HandshakeAction::Send(bytes)] => bytes,
            other => unreachable!("expected a single Send, got {other:?}"),
        }
    }

    fn run_to_acceptance(hs: &mut Handshake) {
        hs.handle_message(DISPLAY_PROMPT).unwrap();
        hs.handle_message(LOGIN_PROMPT).unwrap();
        hs.handle_message(PASSWORD_PROMPT).unwrap();
        assert_eq!(hs.state(), HandshakeState::AwaitAcceptance);
    }

    #[test]
    fn full_sequence_sends_display_login_hash_then_version_query() {
        let mut hs = handshake();

        let actions = hs.handle_message(DISPLAY_PROMPT).unwrap();
        assert_eq!(sent(&actions), b":0");

        let actions = hs.handle_message(LOGIN_PROMPT).unwrap();
        assert_eq!(sent(&actions), b"alice");

        let actions = hs.handle_message(PASSWORD_PROMPT).unwrap();
        let expected_hash = hash_secret("alice", &Secret::new("hunter2"));
        assert_eq!(sent(&actions), expected_hash.as_bytes());

        let actions = hs.handle_message(ACK).unwrap();
        assert_eq!(sent(&actions), VERSION_COMMAND);
        assert_eq!(hs.state(), HandshakeState::AwaitVersion);

        let actions = hs.handle_message(BANNER).unwrap();
        assert_eq!(
            actions,
            vec![HandshakeAction::Complete { server_version: "2.4.1".to_string() }]
        );
        assert_eq!(hs.state(), HandshakeState::Done);
        assert_eq!(hs.server_version(), Some("2.4.1"));
    }

    #[test]
    fn password_response_is_never_plaintext() {
        let mut hs = handshake();
        hs.handle_message(DISPLAY_PROMPT).unwrap();
        hs.handle_message(LOGIN_PROMPT).unwrap();
        let actions = hs.handle_message(PASSWORD_PROMPT).unwrap();

        let response = sent(&actions);
        assert!(!response.windows(7).any(|w| w == b"hunter2"));
    }

    #[test]
    fn prompt_mismatch_fails() {
        let mut hs = handshake();
        let err = hs.handle_message(LOGIN_PROMPT).unwrap_err();

        assert!(matches!(
            err,
            HandshakeError::UnexpectedPrompt { state: HandshakeState::AwaitDisplayPrompt, .. }
        ));
        assert_eq!(hs.state(), HandshakeState::Failed);
    }

    #[test]
    fn prompts_must_match_exactly() {
        let mut hs = handshake();
        assert!(hs.handle_message(b"display ").is_err());

        let mut hs = handshake();
        hs.handle_message(DISPLAY_PROMPT).unwrap();
        assert!(hs.handle_message(b"login:").is_err());
    }

    #[test]
    fn invalid_login_is_credentials_error() {
        let mut hs = handshake();
        run_to_acceptance(&mut hs);

        let err = hs.handle_message(b"NICOSD WARNING: Invalid login\n").unwrap_err();
        assert_eq!(err, HandshakeError::InvalidCredentials("Invalid login".to_string()));
        assert_eq!(hs.state(), HandshakeState::Failed);
    }

    #[test]
    fn invalid_password_is_credentials_error() {
        let mut hs = handshake();
        run_to_acceptance(&mut hs);

        let err = hs.handle_message(b"NICOSD WARNING: Invalid passwd\n").unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidCredentials(_)));
    }

    #[test]
    fn server_version_error_is_version_mismatch() {
        let mut hs = handshake();
        run_to_acceptance(&mut hs);

        let err = hs.handle_message(b"NICOSD ERROR: version 3 required\n").unwrap_err();
        assert!(matches!(err, HandshakeError::VersionMismatch(_)));
    }

    #[test]
    fn other_rejection_is_reported_verbatim() {
        let mut hs = handshake();
        run_to_acceptance(&mut hs);

        let err = hs.handle_message(b"NICOSD ERROR: untrusted host\n").unwrap_err();
        assert_eq!(err, HandshakeError::Rejected("untrusted host".to_string()));
    }

    #[test]
    fn garbage_verdict_is_unexpected() {
        let mut hs = handshake();
        run_to_acceptance(&mut hs);

        let err = hs.handle_message(b"welcome").unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::UnexpectedPrompt { state: HandshakeState::AwaitAcceptance, .. }
        ));
    }

    #[test]
    fn wrong_protocol_revision_is_version_mismatch() {
        let mut hs = handshake();
        run_to_acceptance(&mut hs);
        hs.handle_message(ACK).unwrap();

        let err = hs
            .handle_message(b"nicosd version: 9.0 (licosd), supports protocol 2\n")
            .unwrap_err();
        assert!(matches!(err, HandshakeError::VersionMismatch(_)));
        assert_eq!(hs.state(), HandshakeState::Failed);
    }

    #[test]
    fn banner_without_protocol_is_version_mismatch() {
        let mut hs = handshake();
        run_to_acceptance(&mut hs);
        hs.handle_message(ACK).unwrap();

        let err = hs.handle_message(b"nicosd version: 1.0\n").unwrap_err();
        assert!(matches!(err, HandshakeError::VersionMismatch(_)));
    }

    #[test]
    fn finished_handshake_rejects_more_input() {
        let mut hs = handshake();
        let _ = hs.handle_message(b"nope");
        assert_eq!(hs.state(), HandshakeState::Failed);

        let err = hs.handle_message(DISPLAY_PROMPT).unwrap_err();
        assert_eq!(err, HandshakeError::InvalidState { state: HandshakeState::Failed });
        assert_eq!(hs.state(), HandshakeState::Failed);
    }

    #[test]
    fn banner_parsing() {
        assert_eq!(
            parse_banner("2.4.1 (licosd), supports protocol 1"),
            ("2.4.1".to_string(), Some(1))
        );
        assert_eq!(parse_banner("3.0, supports protocol 12"), ("3.0".to_string(), Some(12)));
        assert_eq!(parse_banner("3.0 supports protocol x"), ("3.0".to_string(), None));
        assert_eq!(parse_banner(""), (String::new(), None));
    }
}
