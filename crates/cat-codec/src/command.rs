//! Typed CAT commands
//!
//! Each variant knows its wire code and payload width. Values that do not fit
//! their field are rejected instead of being silently widened.

use crate::error::EncodeError;
use crate::{encode_frequency, encode_raw, encode_set_mode, validate_raw, EncodeCommand};

/// Main dial encoder step direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EncoderDirection {
    Up,
    Down,
}

impl EncoderDirection {
    /// Parse the operator-facing spelling (`up`/`down` or the raw `EU`/`ED`)
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "up" | "EU" => Some(Self::Up),
            "down" | "ED" => Some(Self::Down),
            _ => None,
        }
    }
}

/// A command that can be written to the rig
#[derive(Debug, Clone, PartialEq)]
pub enum CatCommand {
    /// VFO-A frequency in Hz: FA00007100000;
    SetFrequency(u64),
    /// Operating mode: MD01;
    SetMode(u8),
    /// Transmit (TX;) or receive (RX;)
    Ptt(bool),
    /// Read query for a two-letter code: SM;
    Query(String),
    /// Repeater shift 0=simplex, 1=plus, 2=minus: RT1;
    Shift(u8),
    /// Repeater offset in Hz, sign folded into 7 characters: OF0600000;
    Offset(i32),
    /// CTCSS tone in Hz, sent as tenths: CT0885;
    CtcssTone(f32),
    /// DCS code: DS023;
    DcsCode(u16),
    /// Main dial step: EU; or ED;
    Encoder(EncoderDirection),
    /// Microphone gain: MG050;
    MicGain(u16),
    /// Recall memory channel: MC005;
    MemoryChannel(u16),
    /// Read memory channel: MR005;
    MemoryRead(u16),
    /// Unmodified passthrough
    Raw(String),
}

fn out_of_range(field: &'static str, value: impl ToString) -> EncodeError {
    EncodeError::OutOfRange {
        field,
        value: value.to_string(),
    }
}

fn fixed_width(
    code: &str,
    field: &'static str,
    value: u16,
    digits: usize,
) -> Result<Vec<u8>, EncodeError> {
    let max = 10u32.pow(digits as u32) - 1;
    if u32::from(value) > max {
        return Err(out_of_range(field, value));
    }
    Ok(format!("{}{:0width$};", code, value, width = digits).into_bytes())
}

impl EncodeCommand for CatCommand {
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            CatCommand::SetFrequency(hz) => encode_frequency(*hz),
            CatCommand::SetMode(mode) => encode_set_mode(*mode),
            CatCommand::Ptt(true) => Ok(b"TX;".to_vec()),
            CatCommand::Ptt(false) => Ok(b"RX;".to_vec()),
            CatCommand::Query(code) => {
                if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
                    return Err(EncodeError::InvalidCommand(code.clone()));
                }
                Ok(encode_raw(code))
            }
            CatCommand::Shift(shift) => {
                if *shift > 2 {
                    return Err(out_of_range("shift", shift));
                }
                Ok(format!("RT{};", shift).into_bytes())
            }
            CatCommand::Offset(hz) => {
                // Negative values spend one of the seven characters on the sign
                if !(-999_999..=9_999_999).contains(hz) {
                    return Err(out_of_range("offset", hz));
                }
                Ok(format!("OF{:07};", hz).into_bytes())
            }
            CatCommand::CtcssTone(tone) => {
                if !tone.is_finite() || *tone < 0.0 {
                    return Err(out_of_range("ctcss", tone));
                }
                let tenths = (tone * 10.0) as u32;
                if tenths > 9_999 {
                    return Err(out_of_range("ctcss", tone));
                }
                Ok(format!("CT{:04};", tenths).into_bytes())
            }
            CatCommand::DcsCode(code) => fixed_width("DS", "dcs", *code, 3),
            CatCommand::Encoder(EncoderDirection::Up) => Ok(b"EU;".to_vec()),
            CatCommand::Encoder(EncoderDirection::Down) => Ok(b"ED;".to_vec()),
            CatCommand::MicGain(gain) => fixed_width("MG", "mic_gain", *gain, 3),
            CatCommand::MemoryChannel(channel) => {
                fixed_width("MC", "memory_channel", *channel, 3)
            }
            CatCommand::MemoryRead(channel) => fixed_width("MR", "memory_channel", *channel, 3),
            CatCommand::Raw(text) => Ok(encode_raw(&validate_raw(text)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CatCommand, EncoderDirection};
    use crate::{EncodeCommand, EncodeError};

    fn wire(cmd: CatCommand) -> String {
        String::from_utf8(cmd.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_ptt() {
        assert_eq!(wire(CatCommand::Ptt(true)), "TX;");
        assert_eq!(wire(CatCommand::Ptt(false)), "RX;");
    }

    #[test]
    fn test_shift() {
        assert_eq!(wire(CatCommand::Shift(0)), "RT0;");
        assert_eq!(wire(CatCommand::Shift(2)), "RT2;");
        assert!(CatCommand::Shift(3).encode().is_err());
    }

    #[test]
    fn test_offset_sign_folded() {
        assert_eq!(wire(CatCommand::Offset(600_000)), "OF0600000;");
        assert_eq!(wire(CatCommand::Offset(-500)), "OF-000500;");
        assert!(CatCommand::Offset(10_000_000).encode().is_err());
        assert!(CatCommand::Offset(-1_000_000).encode().is_err());
    }

    #[test]
    fn test_ctcss_tenths() {
        assert_eq!(wire(CatCommand::CtcssTone(88.5)), "CT0885;");
        assert_eq!(wire(CatCommand::CtcssTone(123.0)), "CT1230;");
        assert!(CatCommand::CtcssTone(f32::NAN).encode().is_err());
        assert!(CatCommand::CtcssTone(-1.0).encode().is_err());
    }

    #[test]
    fn test_three_digit_fields() {
        assert_eq!(wire(CatCommand::DcsCode(23)), "DS023;");
        assert_eq!(wire(CatCommand::MicGain(50)), "MG050;");
        assert_eq!(wire(CatCommand::MemoryChannel(5)), "MC005;");
        assert_eq!(wire(CatCommand::MemoryRead(124)), "MR124;");
        assert_eq!(
            CatCommand::MicGain(1000).encode(),
            Err(EncodeError::OutOfRange {
                field: "mic_gain",
                value: "1000".into()
            })
        );
    }

    #[test]
    fn test_encoder() {
        assert_eq!(wire(CatCommand::Encoder(EncoderDirection::Up)), "EU;");
        assert_eq!(wire(CatCommand::Encoder(EncoderDirection::Down)), "ED;");
        assert_eq!(EncoderDirection::parse("up"), Some(EncoderDirection::Up));
        assert_eq!(EncoderDirection::parse("ED"), Some(EncoderDirection::Down));
        assert_eq!(EncoderDirection::parse("sideways"), None);
    }

    #[test]
    fn test_query_and_raw() {
        assert_eq!(wire(CatCommand::Query("SM".into())), "SM;");
        assert!(CatCommand::Query("S".into()).encode().is_err());
        assert_eq!(wire(CatCommand::Raw("AG0100".into())), "AG0100;");
        assert!(CatCommand::Raw("FA;TX;".into()).encode().is_err());
    }
}
