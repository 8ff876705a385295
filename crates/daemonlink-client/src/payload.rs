//! Event payload deserialization.
//!
//! The client never interprets device data. A [`PayloadCodec`] turns the raw
//! bytes after the event name into a generic [`Value`] for observers.

use serde_json::Value;
use thiserror::Error;

/// A payload the codec could not decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{codec} payload rejected: {reason}")]
pub struct PayloadError {
    /// Name of the codec that failed
    pub codec: &'static str,
    /// What went wrong
    pub reason: String,
}

/// Decoder from raw event payload bytes to a generic value.
pub trait PayloadCodec: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Decode one payload.
    ///
    /// # Errors
    ///
    /// - `PayloadError` if `raw` is not valid for this codec
    fn decode(&self, raw: &[u8]) -> Result<Value, PayloadError>;
}

/// JSON payloads. An empty payload decodes to `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayloads;

impl PayloadCodec for JsonPayloads {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, raw: &[u8]) -> Result<Value, PayloadError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(raw)
            .map_err(|e| PayloadError { codec: self.name(), reason: e.to_string() })
    }
}

/// Pass-through payloads: UTF-8 becomes a string, anything else an array of
/// byte values. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPayloads;

impl PayloadCodec for RawPayloads {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn decode(&self, raw: &[u8]) -> Result<Value, PayloadError> {
        Ok(match std::str::from_utf8(raw) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::Array(raw.iter().map(|&b| Value::from(b)).collect()),
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn json_decodes_scalars_and_structures() {
        assert_eq!(JsonPayloads.decode(b"42").unwrap(), json!(42));
        assert_eq!(
            JsonPayloads.decode(br#"{"dev": "T", "value": 1.5}"#).unwrap(),
            json!({"dev": "T", "value": 1.5})
        );
    }

    #[test]
    fn json_empty_payload_is_null() {
        assert_eq!(JsonPayloads.decode(b"").unwrap(), Value::Null);
        assert_eq!(JsonPayloads.decode(b"  ").unwrap(), Value::Null);
    }

    #[test]
    fn json_rejects_garbage() {
        let err = JsonPayloads.decode(b"{not json").unwrap_err();
        assert_eq!(err.codec, "json");
    }

    #[test]
    fn raw_keeps_text_and_bytes() {
        assert_eq!(RawPayloads.decode(b"a b").unwrap(), json!("a b"));
        assert_eq!(RawPayloads.decode(&[0xff, 0x01]).unwrap(), json!([255, 1]));
    }

    proptest! {
        #[test]
        fn json_numbers_survive(n in any::<i64>()) {
            prop_assert_eq!(JsonPayloads.decode(n.to_string().as_bytes()).unwrap(), json!(n));
        }

        #[test]
        fn raw_never_fails(raw in any::<Vec<u8>>()) {
            let value = RawPayloads.decode(&raw).unwrap();
            prop_assert!(value.is_string() || value.as_array().is_some_and(|a| a.len() == raw.len()));
        }

        #[test]
        fn json_garbage_is_an_error_not_a_panic(raw in any::<Vec<u8>>()) {
            let _ = JsonPayloads.decode(&raw);
        }
    }
}
