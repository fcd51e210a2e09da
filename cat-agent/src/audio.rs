//! Rig audio link
//!
//! Captured sound card audio goes to the relay as binary frames; binary
//! frames from the relay are played back. The link has its own handshake
//! (`trx_audio`) and reconnects independently of the control session.
//!
//! Frames are 16 kHz mono little-endian i16 PCM, [`CHUNK_FRAMES`] samples per
//! captured frame.

#[cfg(feature = "audio")]
mod device;

use std::time::Duration;

use bytes::Bytes;
use cat_relay::Handshake;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::client::send_json;
use crate::error::AgentError;

pub const SAMPLE_RATE: u32 = 16_000;
pub const CHANNELS: u16 = 1;
pub const CHUNK_FRAMES: usize = 1024;

/// Frames buffered in each direction before new ones are dropped
pub const QUEUE_FRAMES: usize = 32;

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub url: String,
    pub handshake: Handshake,
    pub retry_delay: Duration,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

/// Sound card as seen by the link
pub struct AudioIo {
    pub capture: mpsc::Receiver<Bytes>,
    pub playback: mpsc::Sender<Bytes>,
    /// Dropping this stops the device thread
    _stop: Option<std::sync::mpsc::Sender<()>>,
}

impl AudioIo {
    /// Link the relay to arbitrary channels instead of a sound card
    pub fn from_channels(capture: mpsc::Receiver<Bytes>, playback: mpsc::Sender<Bytes>) -> Self {
        Self {
            capture,
            playback,
            _stop: None,
        }
    }
}

impl std::fmt::Debug for AudioIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioIo")
            .field("device_thread", &self._stop.is_some())
            .finish()
    }
}

/// Open the configured sound card devices
#[cfg(feature = "audio")]
pub async fn open_devices(config: &AudioConfig) -> Result<AudioIo, AgentError> {
    let input = config.input_device.clone();
    let output = config.output_device.clone();
    tokio::task::spawn_blocking(move || device::open(input, output))
        .await
        .map_err(|e| AgentError::Audio(format!("device task failed: {e}")))?
}

#[cfg(not(feature = "audio"))]
pub async fn open_devices(_config: &AudioConfig) -> Result<AudioIo, AgentError> {
    Err(AgentError::Audio(
        "built without the audio feature".to_string(),
    ))
}

/// Open the sound card and keep the link up; gives up only if the devices fail
pub async fn run_audio_loop(config: AudioConfig, cancel: CancellationToken) {
    let io = match open_devices(&config).await {
        Ok(io) => io,
        Err(e) => {
            error!("{}, audio disabled", e);
            return;
        }
    };
    run_audio_link(io, config, cancel).await;
}

/// Reconnect loop over an already opened [`AudioIo`]
pub async fn run_audio_link(mut io: AudioIo, config: AudioConfig, cancel: CancellationToken) {
    loop {
        match audio_session(&mut io, &config, &cancel).await {
            Ok(()) => info!("Audio session to {} ended", config.url),
            Err(AgentError::Audio(reason)) => {
                error!("Audio device failed ({}), audio disabled", reason);
                break;
            }
            Err(e) => warn!(
                "Audio connection error ({}), retrying in {:?}",
                e, config.retry_delay
            ),
        }
        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(config.retry_delay) => {}
        }
    }
    debug!("Audio loop stopped");
}

async fn audio_session(
    io: &mut AudioIo,
    config: &AudioConfig,
    cancel: &CancellationToken,
) -> Result<(), AgentError> {
    let (ws, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        connected = connect_async(config.url.as_str()) => connected?,
    };
    info!("Audio connected to {}", config.url);
    let (mut sink, mut stream) = ws.split();
    send_json(&mut sink, &config.handshake).await?;

    // Audio captured while disconnected is stale
    while io.capture.try_recv().is_ok() {}

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return Ok(());
            }
            frame = io.capture.recv() => match frame {
                Some(frame) => sink.send(Message::Binary(frame)).await?,
                None => return Err(AgentError::Audio("capture stream ended".to_string())),
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(frame))) => {
                    if io.playback.try_send(frame).is_err() {
                        trace!("Playback queue full, dropping frame");
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Err(AgentError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}
