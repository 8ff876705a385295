//! Property-based tests for both wire modes
//!
//! These tests verify that framing is correct for ALL payloads, not just
//! specific examples: every accepted payload round-trips exactly, and the
//! delimited mode never silently corrupts a payload containing its
//! terminator.

use bytes::BytesMut;
use daemonlink_proto::{
    Codec, ProtocolError, WireMode,
    wire::{CONTROL_TERMINATOR, EVENT_TERMINATOR},
};
use proptest::prelude::*;

/// Payloads biased towards the reserved bytes
fn payload_with_terminators() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(
        prop_oneof![Just(CONTROL_TERMINATOR), Just(EVENT_TERMINATOR), any::<u8>()],
        0..512,
    )
}

fn arbitrary_mode() -> impl Strategy<Value = WireMode> {
    prop_oneof![
        Just(WireMode::Framed),
        Just(WireMode::Delimited { terminator: CONTROL_TERMINATOR }),
        Just(WireMode::Delimited { terminator: EVENT_TERMINATOR }),
    ]
}

#[test]
fn prop_encode_is_exact_or_rejected() {
    proptest!(|(mode in arbitrary_mode(), payload in payload_with_terminators())| {
        let codec = Codec::new(mode);
        let mut wire = Vec::new();

        match codec.encode(&payload, &mut wire) {
            Ok(()) => {
                let decoded = codec.decode_message(&wire).expect("accepted payload must decode");
                // PROPERTY: accepted payloads round-trip byte for byte
                prop_assert_eq!(decoded.as_ref(), payload.as_slice());
            },
            Err(ProtocolError::TerminatorInPayload { terminator, position }) => {
                // PROPERTY: only delimited mode rejects, and only for a real occurrence
                prop_assert_eq!(mode, WireMode::Delimited { terminator });
                prop_assert_eq!(payload[position], terminator);
                prop_assert!(payload[..position].iter().all(|&b| b != terminator));
                prop_assert!(wire.is_empty());
            },
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    });
}

#[test]
fn prop_framed_accepts_every_payload() {
    proptest!(|(payload in payload_with_terminators())| {
        let codec = Codec::framed();
        let mut wire = Vec::new();
        codec.encode(&payload, &mut wire).expect("framed mode accepts any payload");

        let decoded = codec.decode_message(&wire).expect("should decode");
        prop_assert_eq!(decoded.as_ref(), payload.as_slice());
    });
}

#[test]
fn prop_stream_of_messages_decodes_in_order() {
    proptest!(|(payloads in prop::collection::vec(payload_with_terminators(), 1..8))| {
        let mut codec = Codec::framed();
        let mut buf = BytesMut::new();
        for payload in &payloads {
            codec.encode(payload, &mut buf).expect("should encode");
        }

        for payload in &payloads {
            let decoded = codec.decode(&mut buf).expect("should decode").expect("complete");
            prop_assert_eq!(decoded.as_ref(), payload.as_slice());
        }
        prop_assert!(codec.decode(&mut buf).expect("should decode").is_none());
    });
}

#[test]
fn prop_truncated_stream_never_yields_a_message() {
    proptest!(|(payload in payload_with_terminators(), cut in any::<prop::sample::Index>())| {
        let mut codec = Codec::framed();
        let mut wire = Vec::new();
        codec.encode(&payload, &mut wire).expect("should encode");

        let at = cut.index(wire.len());
        let mut buf = BytesMut::from(&wire[..at]);

        // PROPERTY: a strict prefix of a frame is never mistaken for a message
        prop_assert_eq!(codec.decode(&mut buf).expect("prefix is not an error"), None);
        let at_eof = codec.decode_eof(&mut buf);
        let is_truncation = (at == 0 && at_eof == Ok(None))
            || matches!(at_eof, Err(ProtocolError::FrameTruncated { .. }));
        prop_assert!(is_truncation);
    });
}
