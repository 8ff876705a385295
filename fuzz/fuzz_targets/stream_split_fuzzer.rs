//! Fuzz target for streaming decode across arbitrary read boundaries
//!
//! # Strategy
//!
//! - Encode a batch of payloads, then deliver the bytes in fuzzer-chosen chunks
//! - Optionally corrupt one byte before delivery
//! - Exercise both delimited and framed modes
//!
//! # Invariants
//!
//! - Uncorrupted input MUST decode to exactly the encoded payloads, in order
//! - Chunk boundaries MUST NOT change the result
//! - Corrupted input MUST yield an error or messages, never a panic

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use daemonlink_proto::{Codec, wire::CONTROL_TERMINATOR};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    framed: bool,
    payloads: Vec<Vec<u8>>,
    chunks: Vec<u8>,
    corrupt: Option<(u16, u8)>,
}

fuzz_target!(|input: Input| {
    let codec = if input.framed {
        Codec::framed()
    } else {
        Codec::delimited(CONTROL_TERMINATOR)
    };
    let codec = codec.with_max_message_size(1 << 20);

    let mut wire = Vec::new();
    let mut expected = Vec::new();
    for payload in input.payloads.iter().take(16) {
        if codec.encode(payload, &mut wire).is_ok() {
            expected.push(payload.clone());
        }
    }

    let corrupted = match input.corrupt {
        Some((at, xor)) if !wire.is_empty() && xor != 0 => {
            let idx = at as usize % wire.len();
            wire[idx] ^= xor;
            true
        },
        _ => false,
    };

    let mut decoder = codec.clone();
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    let mut rest = wire.as_slice();
    let mut sizes = input.chunks.iter().map(|&c| usize::from(c) + 1).cycle();

    while !rest.is_empty() {
        let take = sizes.next().unwrap_or(rest.len()).min(rest.len());
        buf.extend_from_slice(&rest[..take]);
        rest = &rest[take..];
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(message)) => decoded.push(message.to_vec()),
                Ok(None) => break,
                Err(_) => {
                    assert!(corrupted, "clean stream failed to decode");
                    return;
                },
            }
        }
    }

    if !corrupted {
        assert!(buf.is_empty());
        assert_eq!(decoded, expected);
    }
});
