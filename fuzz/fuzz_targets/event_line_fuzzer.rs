//! Fuzz target for event line splitting
//!
//! A line that splits MUST yield a non-empty name without whitespace, and the name
//! plus separator plus payload MUST reproduce the line.

#![no_main]

use daemonlink_proto::split_event_line;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|line: &[u8]| {
    if let Ok((name, payload)) = split_event_line(line) {
        assert!(!name.is_empty());
        assert!(!name.bytes().any(|b| b.is_ascii_whitespace()));
        assert!(name.len() + payload.len() <= line.len());
        assert_eq!(&line[..name.len()], name.as_bytes());
        assert!(line.ends_with(payload));
    }
});
