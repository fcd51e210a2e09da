//! Relay configuration
//!
//! Values come from an optional JSON file in the config directory and are
//! overridden by command-line flags or their environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::server::ServerConfig;

/// Command-line flags
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "cat-relay", version, about = "Share one remote rig between many operators")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "RIGLINK_BIND")]
    pub bind: Option<IpAddr>,

    /// HTTP/WebSocket port
    #[arg(long, env = "RIGLINK_PORT")]
    pub port: Option<u16>,

    /// JSON account file
    #[arg(long, env = "RIGLINK_ACCOUNTS")]
    pub accounts: Option<PathBuf>,

    /// Time allowed for a connection's first message
    #[arg(long)]
    pub handshake_timeout_ms: Option<u64>,

    /// Settings file instead of the one in the config directory
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Persisted relay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_accounts")]
    pub accounts: Option<PathBuf>,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8084
}

fn default_accounts() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("accounts.json"))
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_ping_interval_ms() -> u64 {
    5_000
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            accounts: default_accounts(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
        }
    }
}

/// `$XDG_CONFIG_HOME/riglink`, else `~/.config/riglink`
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config);
        if path.is_absolute() {
            return Some(path.join("riglink"));
        }
    }
    dirs::home_dir().map(|h| h.join(".config").join("riglink"))
}

impl RelaySettings {
    fn settings_path() -> Option<PathBuf> {
        config_dir().map(|p| p.join("relay.json"))
    }

    /// Load settings from `path`, or the default location; missing or bad files give defaults
    pub fn load(path: Option<&std::path::Path>) -> Self {
        path.map(PathBuf::from)
            .or_else(Self::settings_path)
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Apply command-line overrides
    pub fn merge(mut self, args: &Args) -> Self {
        if let Some(bind) = args.bind {
            self.bind = bind;
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(accounts) = &args.accounts {
            self.accounts = Some(accounts.clone());
        }
        if let Some(ms) = args.handshake_timeout_ms {
            self.handshake_timeout_ms = ms;
        }
        self
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn server_config(&self) -> ServerConfig {
        let ping_interval = Duration::from_millis(self.ping_interval_ms);
        ServerConfig {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            ping_interval,
            pong_timeout: ping_interval * 2,
        }
    }
}
