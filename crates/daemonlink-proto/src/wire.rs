//! Fixed strings of the daemon protocol.
//!
//! The control channel speaks terminator-delimited messages during the login
//! sequence. Replies are plain text: an acknowledgement token, a prefixed
//! warning or error, or command-specific data.

/// Terminates every control-channel message in delimited mode (ASCII EOT).
pub const CONTROL_TERMINATOR: u8 = 0x04;

/// Terminates every event line on the event channel.
pub const EVENT_TERMINATOR: u8 = b'\n';

/// First prompt of the login sequence; answered with the display identity.
pub const DISPLAY_PROMPT: &[u8] = b"display";

/// Second prompt; answered with the login name.
pub const LOGIN_PROMPT: &[u8] = b"login: ";

/// Third prompt; answered with the hex-encoded credential hash.
pub const PASSWORD_PROMPT: &[u8] = b"passwd: ";

/// Positive acknowledgement, also the login acceptance token.
pub const ACK: &[u8] = b"NICOSD OK\n";

/// Reply to the session termination command.
pub const BYE: &[u8] = b"BYE...\n";

/// Prefix of a negative acknowledgement the server considers recoverable.
pub const WARNING_PREFIX: &[u8] = b"NICOSD WARNING: ";

/// Prefix of a negative acknowledgement caused by a server-side failure.
pub const ERROR_PREFIX: &[u8] = b"NICOSD ERROR: ";

/// Start of every login rejection caused by bad credentials.
pub const INVALID_CREDENTIALS_MARKER: &[u8] = b"NICOSD WARNING: Invalid";

/// Start of a login rejection caused by a protocol version mismatch.
pub const VERSION_MISMATCH_MARKER: &[u8] = b"NICOSD ERROR: version";

/// Asks the server for its version banner.
pub const VERSION_COMMAND: &[u8] = b"get_version";

/// Start of the version banner.
pub const VERSION_REPLY_PREFIX: &[u8] = b"nicosd version: ";

/// Marker inside the version banner that precedes the protocol number.
pub const PROTOCOL_MARKER: &str = "supports protocol ";

/// Protocol revision this client speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Switches the control channel to the framed, compressed encoding.
pub const SET_GZIP_COMMAND: &[u8] = b"set_gzip";

/// Polite session termination.
pub const QUIT_COMMAND: &[u8] = b"exit";

/// Size of the big-endian length prefix in framed mode.
pub const LENGTH_PREFIX_SIZE: usize = 4;
