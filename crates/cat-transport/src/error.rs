//! Error types for the rig transport

use thiserror::Error;

/// Errors that can occur talking to the rig
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// Failed to open serial port
    #[error("failed to open port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// No baud rate produced an answer to the canary query
    #[error("no CAT device answered on {port} (tried {tried:?})")]
    NoDeviceFound { port: String, tried: Vec<u32> },

    /// I/O error on an open transport
    #[error("I/O error on {port}: {reason}")]
    Io { port: String, reason: String },

    /// Transport used after close
    #[error("transport {0} is closed")]
    Closed(String),

    /// Serial port error
    #[error("serial port error: {0}")]
    SerialPort(#[from] serialport::Error),
}
