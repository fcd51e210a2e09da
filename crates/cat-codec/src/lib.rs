//! FT-991A CAT Codec
//!
//! Stateless translation between CAT command primitives and the ASCII wire
//! format spoken by Yaesu FT-991/FT-991A transceivers.
//!
//! Every frame is a two-letter command code, an optional fixed-width
//! zero-padded decimal payload and a `;` terminator:
//!
//! - `FA00007100000;` sets VFO-A to 7.100 MHz (11 digits, Hz)
//! - `MD01;` selects mode 1 (LSB)
//! - `MR005;` reads memory channel 5
//! - `FA;` queries VFO-A, the rig answers with one terminated reply line
//!
//! # Example
//!
//! ```rust
//! use cat_codec::{decode_reply, encode_set_frequency, CatCommand, EncodeCommand};
//!
//! let bytes = encode_set_frequency(7_100_000).unwrap();
//! assert_eq!(bytes, b"FA00007100000;");
//!
//! let ctcss = CatCommand::CtcssTone(88.5).encode().unwrap();
//! assert_eq!(ctcss, b"CT0885;");
//!
//! assert_eq!(decode_reply(b"SM0050;\r\n"), "SM0050");
//! ```

pub mod command;
pub mod error;
pub mod line;
pub mod queries;

pub use command::{CatCommand, EncoderDirection};
pub use error::EncodeError;
pub use line::LineCodec;

/// CAT frame terminator
pub const TERMINATOR: u8 = b';';

/// Largest value the 11-digit frequency field can carry
pub const MAX_FREQUENCY_HZ: u64 = 99_999_999_999;

/// Upper bound for a raw passthrough command, terminator excluded
pub const MAX_RAW_LEN: usize = 64;

/// Trait for commands that can be encoded to wire bytes
pub trait EncodeCommand {
    /// Encode this command to its wire format
    fn encode(&self) -> Result<Vec<u8>, EncodeError>;
}

/// Encode `FA` + 11-digit frequency in Hz
pub fn encode_set_frequency(hz: u32) -> Result<Vec<u8>, EncodeError> {
    encode_frequency(u64::from(hz))
}

/// Encode `FA` for any frequency that fits the 11-digit field
pub fn encode_frequency(hz: u64) -> Result<Vec<u8>, EncodeError> {
    if hz > MAX_FREQUENCY_HZ {
        return Err(EncodeError::FrequencyOutOfRange(hz));
    }
    Ok(format!("FA{:011};", hz).into_bytes())
}

/// Encode `MD` + 2-digit mode number
pub fn encode_set_mode(mode: u8) -> Result<Vec<u8>, EncodeError> {
    if mode > 99 {
        return Err(EncodeError::OutOfRange {
            field: "mode",
            value: mode.to_string(),
        });
    }
    Ok(format!("MD{:02};", mode).into_bytes())
}

/// Pass a raw command through, appending the terminator when absent
pub fn encode_raw(command: &str) -> Vec<u8> {
    let mut bytes = command.as_bytes().to_vec();
    if bytes.last() != Some(&TERMINATOR) {
        bytes.push(TERMINATOR);
    }
    bytes
}

/// Encode a read query: the two-letter code immediately followed by `;`
pub fn encode_query(code: &str) -> Vec<u8> {
    encode_raw(code)
}

/// Decode one reply line into text
///
/// Non-ASCII bytes are replaced, trailing whitespace and terminators are
/// trimmed. An empty slice (read timeout) decodes to an empty string.
pub fn decode_reply(raw: &[u8]) -> String {
    let text: String = raw
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
        .collect();
    text.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .trim_start()
        .to_string()
}

/// Split a decoded reply into its command code and payload
///
/// Returns `None` when the reply is shorter than a command code.
pub fn split_reply(reply: &str) -> Option<(&str, &str)> {
    if reply.len() < 2 || !reply.is_char_boundary(2) {
        return None;
    }
    Some(reply.split_at(2))
}

/// True for the rig's "command not accepted" answer
pub fn is_rejection(reply: &str) -> bool {
    reply == "?"
}

/// True when a memory-read reply describes a populated channel
///
/// Empty channels answer with nothing, with zeros or with a rejection.
pub fn is_populated_memory(reply: &str) -> bool {
    !reply.is_empty() && !is_rejection(reply) && reply.chars().any(|c| c != '0')
}

/// Normalise and check a raw passthrough command
///
/// Accepts printable ASCII starting with a two-letter uppercase code, at most
/// one trailing terminator and no embedded terminators. Returns the command
/// without its terminator.
pub fn validate_raw(command: &str) -> Result<String, EncodeError> {
    let body = command.strip_suffix(';').unwrap_or(command);
    let invalid = || EncodeError::InvalidCommand(command.to_string());

    if body.len() < 2 || body.len() > MAX_RAW_LEN {
        return Err(invalid());
    }
    if !body.bytes().all(|b| b.is_ascii_graphic() || b == b' ') || body.contains(';') {
        return Err(invalid());
    }
    if !body.bytes().take(2).all(|b| b.is_ascii_uppercase()) {
        return Err(invalid());
    }
    Ok(body.to_string())
}
