//! Transport trait for rig communication
//!
//! The [`Transport`] trait abstracts over the line-oriented link to the rig.
//! The serial port and the simulator both implement it, so everything above
//! this layer is indifferent to whether real hardware is attached.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// Line-oriented, half-duplex link to a CAT device
#[async_trait]
pub trait Transport: Send {
    /// Write a complete command frame
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read one `;`-terminated reply line
    ///
    /// Returns an empty vector when nothing arrives within `timeout`.
    async fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Release the underlying device
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}
