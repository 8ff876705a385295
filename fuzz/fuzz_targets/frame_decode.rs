//! Fuzz target for one-shot message decoding
//!
//! Feeds arbitrary bytes to `Codec::decode_message` in both wire modes to find:
//! - Parser crashes or panics
//! - Length prefixes that bypass the size limit
//! - zlib bodies that inflate past the limit
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use daemonlink_proto::{Codec, wire::CONTROL_TERMINATOR};
use libfuzzer_sys::fuzz_target;

const MAX: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    let delimited = Codec::delimited(CONTROL_TERMINATOR).with_max_message_size(MAX);
    if let Ok(message) = delimited.decode_message(data) {
        assert!(message.len() <= MAX);
        assert!(!message.contains(&CONTROL_TERMINATOR));
    }

    let framed = Codec::framed().with_max_message_size(MAX);
    if let Ok(message) = framed.decode_message(data) {
        assert!(message.len() <= MAX);
    }
});
