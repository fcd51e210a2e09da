//! Sound card streams through cpal
//!
//! cpal streams are not `Send`, so they are built, played and dropped on one
//! dedicated thread. Callbacks never block: capture uses `try_send`, playback
//! uses `try_recv` and fills gaps with silence.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{error, info, trace};

use super::{AudioIo, CHANNELS, CHUNK_FRAMES, QUEUE_FRAMES, SAMPLE_RATE};
use crate::error::AgentError;

/// Start capture and playback; streams run until the returned [`AudioIo`] drops
pub fn open(input: Option<String>, output: Option<String>) -> Result<AudioIo, AgentError> {
    let (capture_tx, capture_rx) = mpsc::channel(QUEUE_FRAMES);
    let (playback_tx, playback_rx) = mpsc::channel(QUEUE_FRAMES);
    let (ready_tx, ready_rx) = std_mpsc::channel();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    std::thread::Builder::new()
        .name("audio-devices".to_string())
        .spawn(move || {
            match start_streams(input.as_deref(), output.as_deref(), capture_tx, playback_rx) {
                Ok(streams) => {
                    let _ = ready_tx.send(Ok(()));
                    // Returns once the stop sender is dropped
                    let _ = stop_rx.recv();
                    drop(streams);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })
        .map_err(|e| AgentError::Audio(format!("cannot start device thread: {e}")))?;

    ready_rx
        .recv()
        .map_err(|_| AgentError::Audio("device thread exited".to_string()))??;

    Ok(AudioIo {
        capture: capture_rx,
        playback: playback_tx,
        _stop: Some(stop_tx),
    })
}

fn audio_err(context: &str, e: impl std::fmt::Display) -> AgentError {
    AgentError::Audio(format!("{context}: {e}"))
}

fn start_streams(
    input: Option<&str>,
    output: Option<&str>,
    capture_tx: mpsc::Sender<Bytes>,
    mut playback_rx: mpsc::Receiver<Bytes>,
) -> Result<(cpal::Stream, cpal::Stream), AgentError> {
    let host = cpal::default_host();
    let input_device = match input {
        Some(wanted) => find_device(
            host.input_devices()
                .map_err(|e| audio_err("failed to enumerate input devices", e))?,
            wanted,
        )?,
        None => host
            .default_input_device()
            .ok_or_else(|| AgentError::Audio("no default input device".to_string()))?,
    };
    let output_device = match output {
        Some(wanted) => find_device(
            host.output_devices()
                .map_err(|e| audio_err("failed to enumerate output devices", e))?,
            wanted,
        )?,
        None => host
            .default_output_device()
            .ok_or_else(|| AgentError::Audio("no default output device".to_string()))?,
    };
    info!(
        "Audio devices: capture {:?}, playback {:?}",
        input_device.name().unwrap_or_default(),
        output_device.name().unwrap_or_default()
    );

    let config = cpal::StreamConfig {
        channels: CHANNELS,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut pending: Vec<i16> = Vec::with_capacity(CHUNK_FRAMES);
    let capture = input_device
        .build_input_stream(
            &config,
            move |data: &[i16], _info: &cpal::InputCallbackInfo| {
                for &sample in data {
                    pending.push(sample);
                    if pending.len() == CHUNK_FRAMES {
                        let chunk: Vec<u8> = pending.drain(..).flat_map(i16::to_le_bytes).collect();
                        if capture_tx.try_send(Bytes::from(chunk)).is_err() {
                            trace!("Capture queue full, dropping chunk");
                        }
                    }
                }
            },
            |err| error!("cpal input stream error: {}", err),
            None,
        )
        .map_err(|e| audio_err("failed to build input stream", e))?;

    let mut queued: VecDeque<i16> = VecDeque::new();
    let playback = output_device
        .build_output_stream(
            &config,
            move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                while queued.len() < data.len() {
                    match playback_rx.try_recv() {
                        Ok(frame) => queued.extend(
                            frame
                                .chunks_exact(2)
                                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
                        ),
                        Err(_) => break,
                    }
                }
                // Silence when the relay is behind
                for out in data.iter_mut() {
                    *out = queued.pop_front().unwrap_or(0);
                }
            },
            |err| error!("cpal output stream error: {}", err),
            None,
        )
        .map_err(|e| audio_err("failed to build output stream", e))?;

    capture
        .play()
        .map_err(|e| audio_err("failed to start capture", e))?;
    playback
        .play()
        .map_err(|e| audio_err("failed to start playback", e))?;
    Ok((capture, playback))
}

/// Pick a device by index or by exact name
fn find_device(
    devices: impl Iterator<Item = cpal::Device>,
    wanted: &str,
) -> Result<cpal::Device, AgentError> {
    let index = wanted.parse::<usize>().ok();
    devices
        .enumerate()
        .find(|(i, device)| match index {
            Some(index) => *i == index,
            None => device.name().map(|name| name == wanted).unwrap_or(false),
        })
        .map(|(_, device)| device)
        .ok_or_else(|| AgentError::Audio(format!("audio device not found: {wanted}")))
}
