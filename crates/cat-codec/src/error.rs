//! Error types for CAT encoding

use thiserror::Error;

/// Errors that can occur while encoding a command for the wire
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Frequency does not fit the 11-digit FA/FB field
    #[error("frequency {0} Hz does not fit in 11 digits")]
    FrequencyOutOfRange(u64),

    /// A numeric argument does not fit its fixed-width field
    #[error("{field} value {value} out of range")]
    OutOfRange { field: &'static str, value: String },

    /// Raw command text is not a plausible CAT command
    #[error("invalid CAT command: {0}")]
    InvalidCommand(String),
}
