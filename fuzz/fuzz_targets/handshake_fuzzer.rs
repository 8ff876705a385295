//! Fuzz target for the login state machine
//!
//! # Strategy
//!
//! - Interleave well-formed server messages with arbitrary bytes
//! - Keep feeding after failure or completion
//!
//! # Invariants
//!
//! - `Done` is reachable only after the acceptance token was seen
//! - Once terminal, the state never changes
//! - Responses go out in prompt order: display, login, hash, `get_version`

#![no_main]

use arbitrary::Arbitrary;
use daemonlink_core::{Handshake, HandshakeAction, HandshakeState, Secret};
use daemonlink_proto::wire::{ACK, DISPLAY_PROMPT, LOGIN_PROMPT, PASSWORD_PROMPT};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum ServerMessage {
    Display,
    Login,
    Password,
    Ack,
    Banner { version: String, protocol: u8 },
    Warning(String),
    Raw(Vec<u8>),
}

impl ServerMessage {
    fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Display => DISPLAY_PROMPT.to_vec(),
            Self::Login => LOGIN_PROMPT.to_vec(),
            Self::Password => PASSWORD_PROMPT.to_vec(),
            Self::Ack => ACK.to_vec(),
            Self::Banner { version, protocol } => {
                format!("nicosd version: {version} (fuzz), supports protocol {protocol}\n")
                    .into_bytes()
            },
            Self::Warning(text) => format!("NICOSD WARNING: {text}\n").into_bytes(),
            Self::Raw(bytes) => bytes.clone(),
        }
    }
}

fuzz_target!(|messages: Vec<ServerMessage>| {
    let mut handshake = Handshake::new(":0", "alice", &Secret::new("hunter2"));
    let mut sent = 0usize;
    let mut accepted = false;

    for message in messages.iter().take(32) {
        let before = handshake.state();
        let bytes = message.bytes();
        if before == HandshakeState::AwaitAcceptance && bytes == ACK {
            accepted = true;
        }

        match handshake.handle_message(&bytes) {
            Ok(actions) => {
                assert!(!before.is_terminal());
                for action in actions {
                    match action {
                        HandshakeAction::Send(_) => sent += 1,
                        HandshakeAction::Complete { .. } => {
                            assert!(accepted);
                            assert_eq!(sent, 4);
                        },
                    }
                }
            },
            Err(_) => {
                if before.is_terminal() {
                    assert_eq!(handshake.state(), before);
                } else {
                    assert_eq!(handshake.state(), HandshakeState::Failed);
                }
            },
        }

        if handshake.state() == HandshakeState::Done {
            assert!(accepted);
            assert!(handshake.server_version().is_some());
        }
    }
});
