//! Agent settings
//!
//! Defaults, then `agent.json` from the config directory, then flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cat_codec::queries::{parse_battery, POLL_QUERIES};
use cat_relay::config::config_dir;
use cat_relay::{Handshake, HandshakeMode};
use cat_sim::SimConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;
use crate::client::ControlConfig;

/// Command-line flags
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "cat-agent", version, about = "Connect a local FT-991A to a rig relay")]
pub struct Args {
    /// Serial port the rig is attached to
    #[arg(long, env = "RIGLINK_SERIAL_PORT")]
    pub serial_port: Option<String>,

    /// First baud rate to try
    #[arg(long)]
    pub baudrate: Option<u32>,

    /// Callsign announced to the relay
    #[arg(long, env = "RIGLINK_CALLSIGN")]
    pub callsign: Option<String>,

    /// Relay control URL (http and https are accepted)
    #[arg(long, env = "RIGLINK_SERVER")]
    pub server: Option<String>,

    /// Relay audio URL, derived from --server when absent
    #[arg(long, env = "RIGLINK_AUDIO_SERVER")]
    pub audio_server: Option<String>,

    #[arg(long, env = "RIGLINK_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "RIGLINK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Capture device, by index or name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Playback device, by index or name
    #[arg(long)]
    pub output_device: Option<String>,

    /// Pause between reconnect attempts
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Exit instead of falling back to the simulated rig
    #[arg(long)]
    pub no_simulator: bool,

    /// Print the serial ports found and exit
    #[arg(long)]
    pub list_ports: bool,

    /// Settings file instead of the one in the config directory
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Persisted agent settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub serial_port: String,
    pub baudrate: u32,
    pub callsign: String,
    pub server: String,
    pub audio_server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub ping_interval_ms: u64,
    pub read_timeout_ms: u64,
    /// Comma separated poll codes; the full battery when absent
    pub poll_queries: Option<String>,
    pub simulator_fallback: bool,
    /// Initial state of the simulated rig
    pub simulator: SimConfig,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            serial_port: "COM3".to_string(),
            baudrate: 9600,
            callsign: "FT-991A".to_string(),
            server: "ws://localhost:8084/ws/rig".to_string(),
            audio_server: None,
            username: None,
            password: None,
            input_device: None,
            output_device: None,
            retry_delay_ms: 1_000,
            poll_interval_ms: 200,
            ping_interval_ms: 5_000,
            read_timeout_ms: 250,
            poll_queries: None,
            simulator_fallback: true,
            simulator: SimConfig::default(),
        }
    }
}

impl AgentSettings {
    fn settings_path() -> Option<PathBuf> {
        config_dir().map(|p| p.join("agent.json"))
    }

    /// Load settings from `path`, or the default location; missing or bad files give defaults
    pub fn load(path: Option<&Path>) -> Self {
        path.map(PathBuf::from)
            .or_else(Self::settings_path)
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Apply command-line overrides
    pub fn merge(mut self, args: &Args) -> Self {
        if let Some(port) = &args.serial_port {
            self.serial_port = port.clone();
        }
        if let Some(baud) = args.baudrate {
            self.baudrate = baud;
        }
        if let Some(callsign) = &args.callsign {
            self.callsign = callsign.clone();
        }
        if let Some(server) = &args.server {
            self.server = server.clone();
        }
        if args.audio_server.is_some() {
            self.audio_server = args.audio_server.clone();
        }
        if args.username.is_some() {
            self.username = args.username.clone();
        }
        if args.password.is_some() {
            self.password = args.password.clone();
        }
        if args.input_device.is_some() {
            self.input_device = args.input_device.clone();
        }
        if args.output_device.is_some() {
            self.output_device = args.output_device.clone();
        }
        if let Some(ms) = args.retry_delay_ms {
            self.retry_delay_ms = ms;
        }
        if args.no_simulator {
            self.simulator_fallback = false;
        }
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Control URL in WebSocket form
    pub fn control_url(&self) -> String {
        to_ws_url(&self.server)
    }

    /// Audio URL: explicit, or the control URL with its last segment replaced
    pub fn audio_url(&self) -> String {
        match &self.audio_server {
            Some(url) => to_ws_url(url),
            None => sibling_url(&self.control_url(), "rig_audio"),
        }
    }

    fn handshake(&self, mode: HandshakeMode) -> Handshake {
        Handshake {
            callsign: Some(self.callsign.clone()),
            username: self.username.clone(),
            password: self.password.clone(),
            mode,
        }
    }

    pub fn control_handshake(&self) -> Handshake {
        self.handshake(HandshakeMode::Trx)
    }

    pub fn audio_handshake(&self) -> Handshake {
        self.handshake(HandshakeMode::TrxAudio)
    }

    pub fn control_config(&self) -> ControlConfig {
        ControlConfig {
            url: self.control_url(),
            handshake: self.control_handshake(),
            retry_delay: self.retry_delay(),
            poll_interval: self.poll_interval(),
            ping_interval: self.ping_interval(),
            queries: self.poll_battery(),
        }
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            url: self.audio_url(),
            handshake: self.audio_handshake(),
            retry_delay: self.retry_delay(),
            input_device: self.input_device.clone(),
            output_device: self.output_device.clone(),
        }
    }

    pub fn poll_battery(&self) -> Vec<String> {
        match &self.poll_queries {
            Some(list) => parse_battery(list),
            None => POLL_QUERIES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Rewrite `http://` and `https://` to `ws://` and `wss://`
pub fn to_ws_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

/// Replace the final path segment of `url`
fn sibling_url(url: &str, segment: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((base, _)) if !base.ends_with('/') => format!("{base}/{segment}"),
        _ => format!("{trimmed}/{segment}"),
    }
}
