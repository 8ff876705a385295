//! Property-based tests for the login sequence
//!
//! For every identity triple, the server sees exactly the display, the login
//! and the credential hash, in that order, and never the plaintext secret.

use daemonlink_core::{Handshake, HandshakeAction, HandshakeState, Secret, hash_secret};
use daemonlink_proto::wire::{ACK, DISPLAY_PROMPT, LOGIN_PROMPT, PASSWORD_PROMPT};
use proptest::prelude::*;

fn responses(hs: &mut Handshake, prompts: &[&[u8]]) -> Vec<Vec<u8>> {
    prompts
        .iter()
        .map(|prompt| match hs.handle_message(prompt).expect("prompt accepted").as_slice() {
            [HandshakeAction::Send(bytes)] => bytes.to_vec(),
            other => unreachable!("expected a single Send, got {other:?}"),
        })
        .collect()
}

#[test]
fn prop_responses_follow_prompt_order() {
    proptest!(|(
        display in "[ -~]{0,32}",
        login in "[a-z][a-z0-9_]{0,15}",
        // 'z' keeps the secret from ever being a substring of a hex digest
        secret in "z[ -~]{7,31}",
    )| {
        let mut hs = Handshake::new(display.clone(), login.clone(), &Secret::new(secret.clone()));
        let sent = responses(&mut hs, &[DISPLAY_PROMPT, LOGIN_PROMPT, PASSWORD_PROMPT]);

        prop_assert_eq!(&sent[0], display.as_bytes());
        prop_assert_eq!(&sent[1], login.as_bytes());
        let expected_hash = hash_secret(&login, &Secret::new(secret.clone()));
        prop_assert_eq!(&sent[2], expected_hash.as_bytes());

        // PROPERTY: the plaintext secret never reaches the wire
        for response in &sent {
            prop_assert!(!response.windows(secret.len()).any(|w| w == secret.as_bytes()));
        }
        prop_assert_eq!(hs.state(), HandshakeState::AwaitAcceptance);
    });
}

#[test]
fn prop_arbitrary_input_never_reaches_done_without_acceptance() {
    proptest!(|(messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8))| {
        let mut hs = Handshake::new(":0", "alice", &Secret::new("pw"));
        for message in &messages {
            if message.as_slice() == ACK {
                return Ok(());
            }
            let _ = hs.handle_message(message);
        }
        // PROPERTY: without the acceptance token the session is never established
        prop_assert_ne!(hs.state(), HandshakeState::Done);
    });
}
