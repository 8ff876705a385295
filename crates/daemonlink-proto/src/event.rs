//! Event line parsing.

use crate::errors::{ProtocolError, Result};

/// Split an event line into `(event_name, raw_payload)`.
///
/// The name ends at the first ASCII whitespace byte; that single byte is
/// dropped and everything after it is the payload, untouched. A line without
/// whitespace is an event with an empty payload.
///
/// # Errors
///
/// - `ProtocolError::MalformedEvent` if the name is empty or not UTF-8
pub fn split_event_line(line: &[u8]) -> Result<(&str, &[u8])> {
    let (name, payload) = match line.iter().position(u8::is_ascii_whitespace) {
        Some(at) => (&line[..at], &line[at + 1..]),
        None => (line, &[][..]),
    };

    if name.is_empty() {
        return Err(ProtocolError::MalformedEvent("empty event name".to_string()));
    }

    let name = std::str::from_utf8(name)
        .map_err(|e| ProtocolError::MalformedEvent(format!("event name is not UTF-8: {e}")))?;

    Ok((name, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_space_only() {
        let (name, payload) = split_event_line(b"message [1, 2, \"a b\"]").unwrap();
        assert_eq!(name, "message");
        assert_eq!(payload, b"[1, 2, \"a b\"]");
    }

    #[test]
    fn line_without_payload() {
        let (name, payload) = split_event_line(b"status").unwrap();
        assert_eq!(name, "status");
        assert!(payload.is_empty());
    }

    #[test]
    fn payload_bytes_are_not_interpreted() {
        let (name, payload) = split_event_line(b"raw \xff\x00\x04").unwrap();
        assert_eq!(name, "raw");
        assert_eq!(payload, b"\xff\x00\x04");
    }

    #[test]
    fn rejects_empty_name() {
        assert!(matches!(split_event_line(b" 42"), Err(ProtocolError::MalformedEvent(_))));
        assert!(matches!(split_event_line(b""), Err(ProtocolError::MalformedEvent(_))));
    }

    #[test]
    fn rejects_non_utf8_name() {
        assert!(matches!(split_event_line(b"\xff\xfe 1"), Err(ProtocolError::MalformedEvent(_))));
    }
}
