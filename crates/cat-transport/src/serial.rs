//! Serial port transport
//!
//! [`SerialTransport`] owns one `tokio-serial` stream and reassembles replies
//! with a [`LineCodec`] so that partial reads never leak a half reply upward.

use std::time::Duration;

use async_trait::async_trait;
use cat_codec::LineCodec;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::transport::Transport;

/// Serial link to a CAT device
pub struct SerialTransport {
    port: Option<SerialStream>,
    port_name: String,
    baud_rate: u32,
    codec: LineCodec,
}

impl SerialTransport {
    /// Open `port` at `baud_rate`, 8N1 without flow control
    pub fn open(port: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let stream = tokio_serial::new(port, baud_rate)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(|e| TransportError::OpenFailed {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Opened {} at {} baud", port, baud_rate);
        Ok(Self {
            port: Some(stream),
            port_name: port.to_string(),
            baud_rate,
            codec: LineCodec::new(),
        })
    }

    /// Port name this transport was opened on
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Baud rate this transport was opened at
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn io_error(&self, e: impl ToString) -> TransportError {
        TransportError::Io {
            port: self.port_name.clone(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        // Anything still buffered belongs to an earlier exchange
        self.codec.clear();

        let Some(port) = self.port.as_mut() else {
            return Err(TransportError::Closed(self.port_name.clone()));
        };
        trace!("-> {}", String::from_utf8_lossy(data));
        let result = match port.write_all(data).await {
            Ok(()) => port.flush().await,
            Err(e) => Err(e),
        };
        result.map_err(|e| self.io_error(e))
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 64];

        loop {
            if let Some(line) = self.codec.next_line() {
                trace!("<- {}", String::from_utf8_lossy(&line));
                return Ok(line);
            }

            let Some(port) = self.port.as_mut() else {
                return Err(TransportError::Closed(self.port_name.clone()));
            };

            let outcome = timeout_at(deadline, port.read(&mut buf)).await;
            match outcome {
                Ok(Ok(0)) => return Err(self.io_error("end of stream")),
                Ok(Ok(n)) => self.codec.push_bytes(&buf[..n]),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Ok(Err(e)) => return Err(self.io_error(e)),
                Err(_) => {
                    if self.codec.pending() > 0 {
                        debug!(
                            "Discarding {} unterminated byte(s) from {}",
                            self.codec.pending(),
                            self.port_name
                        );
                        self.codec.clear();
                    }
                    return Ok(Vec::new());
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            debug!("Closed {}", self.port_name);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port_name, self.baud_rate)
    }
}
