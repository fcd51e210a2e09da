//! Baud-rate autodetection
//!
//! The rig's configured CAT rate is not always known. Starting from the
//! requested rate, each candidate is opened and sent the `FA;` canary; the
//! first rate that yields a non-empty reply is kept.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::serial::SerialTransport;
use crate::transport::Transport;

/// Rates the FT-991A CAT port can be configured for, ascending
pub const BAUD_RATES: [u32; 6] = [4800, 9600, 19200, 38400, 57600, 115200];

/// Query that every CAT-capable Yaesu answers
pub const CANARY: &[u8] = b"FA;";

/// How long to wait for the canary reply at each rate
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Something that can open a transport on a port at a given rate
#[async_trait]
pub trait PortOpener: Send + Sync {
    /// Open `port` at `baud_rate`
    async fn open(&self, port: &str, baud_rate: u32)
        -> Result<Box<dyn Transport>, TransportError>;
}

/// Opens real serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

#[async_trait]
impl PortOpener for SerialOpener {
    async fn open(
        &self,
        port: &str,
        baud_rate: u32,
    ) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(SerialTransport::open(port, baud_rate)?))
    }
}

/// A transport bound at the rate that answered
pub struct Detected {
    /// The open transport
    pub transport: Box<dyn Transport>,
    /// Rate the device answered at
    pub baud_rate: u32,
}

impl std::fmt::Debug for Detected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detected")
            .field("transport", &self.transport.describe())
            .field("baud_rate", &self.baud_rate)
            .finish()
    }
}

/// Candidate rates for a requested start rate
///
/// The requested rate is always tried first, followed by every standard rate
/// above it in ascending order.
pub fn baud_ladder(start: u32) -> Vec<u32> {
    let mut rates: Vec<u32> = BAUD_RATES.iter().copied().filter(|&r| r >= start).collect();
    if !rates.contains(&start) {
        rates.insert(0, start);
    }
    rates
}

/// Open a serial port, climbing the baud ladder until the rig answers
pub async fn open(port: &str, baud_rate: u32) -> Result<Detected, TransportError> {
    autodetect(&SerialOpener, port, baud_rate, DEFAULT_PROBE_TIMEOUT).await
}

/// Walk the baud ladder with `opener` until the canary is answered
pub async fn autodetect(
    opener: &dyn PortOpener,
    port: &str,
    baud_rate: u32,
    probe_timeout: Duration,
) -> Result<Detected, TransportError> {
    let ladder = baud_ladder(baud_rate);
    let mut tried = Vec::with_capacity(ladder.len());

    for rate in ladder {
        tried.push(rate);

        let mut transport = match opener.open(port, rate).await {
            Ok(t) => t,
            Err(e) => {
                debug!("Cannot open {} at {}: {}", port, rate, e);
                continue;
            }
        };

        if probe(&mut *transport, probe_timeout).await {
            info!("Baud rate {} detected on {}", rate, port);
            return Ok(Detected {
                transport,
                baud_rate: rate,
            });
        }

        if let Err(e) = transport.close().await {
            warn!("Failed to close {} after probe at {}: {}", port, rate, e);
        }
    }

    Err(TransportError::NoDeviceFound {
        port: port.to_string(),
        tried,
    })
}

async fn probe(transport: &mut dyn Transport, probe_timeout: Duration) -> bool {
    if let Err(e) = transport.write(CANARY).await {
        debug!("Canary write failed on {}: {}", transport.describe(), e);
        return false;
    }
    match transport.read_line(probe_timeout).await {
        Ok(reply) => !cat_codec::decode_reply(&reply).is_empty(),
        Err(e) => {
            debug!("Canary read failed on {}: {}", transport.describe(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Device that only understands one baud rate
    struct PickyDevice {
        answers: bool,
        pending: Option<Vec<u8>>,
    }

    #[async_trait]
    impl Transport for PickyDevice {
        async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
            if self.answers && data == CANARY {
                self.pending = Some(b"FA00014250000;".to_vec());
            }
            Ok(())
        }

        async fn read_line(&mut self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
            Ok(self.pending.take().unwrap_or_default())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn describe(&self) -> String {
            "picky".into()
        }
    }

    struct PickyOpener {
        speaks_at: u32,
        unopenable: Vec<u32>,
        attempts: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl PortOpener for PickyOpener {
        async fn open(
            &self,
            port: &str,
            baud_rate: u32,
        ) -> Result<Box<dyn Transport>, TransportError> {
            self.attempts.lock().unwrap().push(baud_rate);
            if self.unopenable.contains(&baud_rate) {
                return Err(TransportError::OpenFailed {
                    port: port.into(),
                    reason: "busy".into(),
                });
            }
            Ok(Box::new(PickyDevice {
                answers: baud_rate == self.speaks_at,
                pending: None,
            }))
        }
    }

    fn opener(speaks_at: u32) -> PickyOpener {
        PickyOpener {
            speaks_at,
            unopenable: Vec::new(),
            attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[test]
    fn test_ladder_from_standard_rate() {
        assert_eq!(baud_ladder(9600), vec![9600, 19200, 38400, 57600, 115200]);
        assert_eq!(baud_ladder(115200), vec![115200]);
        assert_eq!(baud_ladder(4800), BAUD_RATES.to_vec());
    }

    #[test]
    fn test_ladder_from_odd_rate() {
        assert_eq!(baud_ladder(14400), vec![14400, 19200, 38400, 57600, 115200]);
        assert_eq!(baud_ladder(230400), vec![230400]);
    }

    #[tokio::test]
    async fn test_detects_19200_after_trying_9600() {
        let opener = opener(19200);
        let detected = autodetect(&opener, "COM3", 9600, Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(detected.baud_rate, 19200);
        assert_eq!(*opener.attempts.lock().unwrap(), vec![9600, 19200]);
    }

    #[tokio::test]
    async fn test_requested_rate_wins_when_it_answers() {
        let opener = opener(9600);
        let detected = autodetect(&opener, "COM3", 9600, Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(detected.baud_rate, 9600);
        assert_eq!(*opener.attempts.lock().unwrap(), vec![9600]);
    }

    #[tokio::test]
    async fn test_unopenable_rates_are_skipped() {
        let mut opener = opener(38400);
        opener.unopenable = vec![19200];
        let detected = autodetect(&opener, "COM3", 9600, Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(detected.baud_rate, 38400);
        assert_eq!(*opener.attempts.lock().unwrap(), vec![9600, 19200, 38400]);
    }

    #[tokio::test]
    async fn test_silent_device_is_not_found() {
        let opener = opener(4800);
        let err = autodetect(&opener, "COM3", 9600, Duration::from_millis(10))
            .await
            .unwrap_err();

        match err {
            TransportError::NoDeviceFound { port, tried } => {
                assert_eq!(port, "COM3");
                assert_eq!(tried, vec![9600, 19200, 38400, 57600, 115200]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
