//! Rig-side agent
//!
//! Owns the serial link to a local FT-991A and keeps two WebSocket links to
//! the relay alive:
//!
//! - control ([`client`]): handshake, startup battery, memory list, periodic
//!   polling and command execution
//! - audio ([`audio`]): sound card frames in both directions, with the
//!   `audio` cargo feature
//!
//! When no rig answers on the configured port the agent falls back to the
//! simulator from `cat-sim`.

pub mod audio;
pub mod client;
pub mod error;
pub mod executor;
pub mod poller;
pub mod settings;

pub use audio::{run_audio_link, run_audio_loop, AudioConfig, AudioIo};
pub use client::{run_control_loop, run_session, ControlConfig};
pub use error::AgentError;
pub use executor::execute;
pub use poller::{poll_once, run_poller, startup, Changes, ParameterCache, Startup};
pub use settings::{to_ws_url, AgentSettings, Args};
