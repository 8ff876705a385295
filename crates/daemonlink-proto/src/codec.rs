//! Message framing.
//!
//! Two encodings share one [`Codec`]:
//!
//! - Delimited: `[payload][terminator]`. The terminator is reserved and may
//!   not occur inside a payload; the encoder rejects such payloads instead of
//!   escaping them, so a decoded message is always byte-identical to what was
//!   encoded.
//! - Framed: `[length: u32 BE][zlib(payload)]`. The length counts compressed
//!   bytes. Any payload is allowed, including ones containing the delimited
//!   terminator.
//!
//! The streaming decoder ([`Codec::decode`]) works on a growing `BytesMut`
//! and leaves unconsumed bytes in place, so several messages arriving in one
//! read are returned one at a time.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};

use crate::{
    errors::{ProtocolError, Result},
    wire::LENGTH_PREFIX_SIZE,
};

/// Default upper bound for a single decoded message (16 MiB).
///
/// Applies to the decompressed payload in framed mode, to the compressed body
/// announced by the length prefix, and to unterminated data buffered in
/// delimited mode.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Wire encoding of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMode {
    /// Raw payload followed by a reserved terminator byte
    Delimited {
        /// The reserved byte
        terminator: u8,
    },
    /// Big-endian length prefix followed by a zlib-compressed payload
    Framed,
}

/// Encoder/decoder for one stream.
///
/// Holds only scan progress for the delimited decoder; the byte buffer
/// itself belongs to the caller.
#[derive(Debug, Clone)]
pub struct Codec {
    mode: WireMode,
    max_message_size: usize,
    /// Bytes of the caller's buffer already searched for a terminator
    scanned: usize,
}

impl Codec {
    /// Create a codec for the given mode with the default size limit
    pub fn new(mode: WireMode) -> Self {
        Self { mode, max_message_size: DEFAULT_MAX_MESSAGE_SIZE, scanned: 0 }
    }

    /// Delimited codec using `terminator`
    pub fn delimited(terminator: u8) -> Self {
        Self::new(WireMode::Delimited { terminator })
    }

    /// Length-prefixed compressed codec
    pub fn framed() -> Self {
        Self::new(WireMode::Framed)
    }

    /// Replace the size limit
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Current wire mode
    pub fn mode(&self) -> WireMode {
        self.mode
    }

    /// Size limit in bytes
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Switch encodings. Only meaningful between messages.
    pub fn set_mode(&mut self, mode: WireMode) {
        self.mode = mode;
        self.scanned = 0;
    }

    /// Encode one message into `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::TerminatorInPayload` in delimited mode if the payload
    ///   contains the terminator. Nothing is written in that case.
    /// - `ProtocolError::MessageTooLarge` if the payload (or its compressed
    ///   form) exceeds the size limit
    /// - `ProtocolError::Compression` if zlib fails
    pub fn encode(&self, payload: &[u8], dst: &mut impl BufMut) -> Result<()> {
        self.check_size(payload.len())?;

        match self.mode {
            WireMode::Delimited { terminator } => {
                if let Some(position) = payload.iter().position(|&b| b == terminator) {
                    return Err(ProtocolError::TerminatorInPayload { terminator, position });
                }
                dst.put_slice(payload);
                dst.put_u8(terminator);
            },
            WireMode::Framed => {
                let body = compress(payload)?;
                self.check_size(body.len())?;
                let len = u32::try_from(body.len()).map_err(|_| {
                    ProtocolError::MessageTooLarge { size: body.len(), max: self.max_message_size }
                })?;
                dst.put_u32(len);
                dst.put_slice(&body);
            },
        }

        Ok(())
    }

    /// Decode the next message from a stream buffer.
    ///
    /// Returns `Ok(None)` when `src` does not yet hold a complete message;
    /// the caller reads more bytes and calls again. Consumed bytes are removed
    /// from `src`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MessageTooLarge` if the length prefix, or the
    ///   unterminated data, exceeds the size limit
    /// - `ProtocolError::Decompression` if a framed body is not valid zlib
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.mode {
            WireMode::Delimited { terminator } => self.decode_delimited(terminator, src),
            WireMode::Framed => self.decode_framed(src),
        }
    }

    /// Like [`Codec::decode`], for the final call after the peer closed the
    /// stream. Leftover bytes that do not form a message are an error.
    pub fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(self.incomplete(&src[..])),
        }
    }

    /// Describe why `partial` is not a complete message.
    pub fn incomplete(&self, partial: &[u8]) -> ProtocolError {
        match self.mode {
            WireMode::Delimited { .. } => ProtocolError::Unterminated { buffered: partial.len() },
            WireMode::Framed => match read_prefix(partial) {
                Some(claimed) => ProtocolError::FrameTruncated {
                    expected: claimed,
                    actual: partial.len() - LENGTH_PREFIX_SIZE,
                },
                None => ProtocolError::FrameTruncated {
                    expected: LENGTH_PREFIX_SIZE,
                    actual: partial.len(),
                },
            },
        }
    }

    /// Decode a buffer that must contain exactly one message.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::TerminatorMidMessage` if a delimited buffer has its
    ///   terminator anywhere but at the end
    /// - `ProtocolError::Unterminated` if a delimited buffer has no terminator
    /// - `ProtocolError::FrameTruncated` / `ProtocolError::TrailingBytes` if
    ///   a framed buffer does not match its length prefix
    pub fn decode_message(&self, bytes: &[u8]) -> Result<Bytes> {
        match self.mode {
            WireMode::Delimited { terminator } => {
                let len = bytes.len();
                match bytes.iter().position(|&b| b == terminator) {
                    None => Err(ProtocolError::Unterminated { buffered: len }),
                    Some(position) if position + 1 == len => {
                        self.check_size(position)?;
                        Ok(Bytes::copy_from_slice(&bytes[..position]))
                    },
                    Some(position) => Err(ProtocolError::TerminatorMidMessage { position, len }),
                }
            },
            WireMode::Framed => {
                let Some(claimed) = read_prefix(bytes) else {
                    return Err(self.incomplete(bytes));
                };
                self.check_size(claimed)?;

                let body = &bytes[LENGTH_PREFIX_SIZE..];
                if body.len() < claimed {
                    return Err(ProtocolError::FrameTruncated {
                        expected: claimed,
                        actual: body.len(),
                    });
                }
                if body.len() > claimed {
                    return Err(ProtocolError::TrailingBytes { extra: body.len() - claimed });
                }

                decompress(body, self.max_message_size).map(Bytes::from)
            },
        }
    }

    fn decode_delimited(&mut self, terminator: u8, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let start = self.scanned.min(src.len());

        match src[start..].iter().position(|&b| b == terminator) {
            Some(offset) => {
                let end = start + offset;
                self.check_size(end)?;

                let message = src.split_to(end).freeze();
                src.advance(1);
                self.scanned = 0;

                Ok(Some(message))
            },
            None => {
                self.check_size(src.len())?;
                self.scanned = src.len();
                Ok(None)
            },
        }
    }

    fn decode_framed(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let Some(claimed) = read_prefix(&src[..]) else {
            return Ok(None);
        };

        // Reject before buffering the body
        self.check_size(claimed)?;

        let total = LENGTH_PREFIX_SIZE + claimed;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let body = src.split_to(claimed);

        decompress(&body, self.max_message_size).map(|payload| Some(Bytes::from(payload)))
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge { size, max: self.max_message_size });
        }
        Ok(())
    }
}

/// Length announced by a framed prefix, if the prefix is complete.
fn read_prefix(bytes: &[u8]) -> Option<usize> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix) as usize)
}

fn compress(payload: &[u8]) -> Result<Vec<u8>> {
    let buffer = Vec::with_capacity(payload.len() / 2 + 16);
    let mut encoder = ZlibEncoder::new(buffer, Compression::default());
    encoder.write_all(payload).map_err(|e| ProtocolError::Compression(e.to_string()))?;
    encoder.finish().map_err(|e| ProtocolError::Compression(e.to_string()))
}

fn decompress(body: &[u8], max: usize) -> Result<Vec<u8>> {
    let mut payload = Vec::new();

    // One byte past the limit distinguishes "exactly max" from "too large"
    ZlibDecoder::new(body)
        .take(max as u64 + 1)
        .read_to_end(&mut payload)
        .map_err(|e| ProtocolError::Decompression(e.to_string()))?;

    if payload.len() > max {
        return Err(ProtocolError::MessageTooLarge { size: payload.len(), max });
    }

    Ok(payload)
}
