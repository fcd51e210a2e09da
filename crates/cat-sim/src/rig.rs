//! Simulated FT-991A
//!
//! Keeps VFO frequencies, mode, PTT, a fixed memory table and a handful of
//! menu-style settings, and answers read queries the way the rig does: one
//! `;`-terminated line per query, prefixed with the command code.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use cat_codec::split_reply;
use cat_transport::{Transport, TransportError};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::journal::SimJournal;

/// A stored memory channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryChannel {
    /// Frequency in Hz
    pub frequency_hz: u64,
    /// Mode number as used by `MD`
    pub mode: u8,
}

/// Initial state of a simulated rig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// VFO-A frequency in Hz
    #[serde(default = "default_frequency")]
    pub frequency_hz: u64,
    /// Mode number
    #[serde(default = "default_mode")]
    pub mode: u8,
    /// Populated memory channels
    #[serde(default = "default_memories")]
    pub memories: BTreeMap<u16, MemoryChannel>,
}

fn default_frequency() -> u64 {
    7_100_000
}

fn default_mode() -> u8 {
    1
}

fn default_memories() -> BTreeMap<u16, MemoryChannel> {
    BTreeMap::from([
        (
            0,
            MemoryChannel {
                frequency_hz: 145_500_000,
                mode: 4,
            },
        ),
        (
            1,
            MemoryChannel {
                frequency_hz: 7_100_000,
                mode: 1,
            },
        ),
        (
            2,
            MemoryChannel {
                frequency_hz: 144_800_000,
                mode: 2,
            },
        ),
    ])
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frequency_hz: default_frequency(),
            mode: default_mode(),
            memories: default_memories(),
        }
    }
}

/// Readable settings and their power-on values
const SETTINGS: &[(&str, &str)] = &[
    ("PC", "050"),
    ("RG", "0255"),
    ("GT", "00"),
    ("NR", "00"),
    ("NB", "00"),
    ("SQ", "0000"),
    ("MG", "050"),
    ("RT", "0"),
    ("OF", "0600000"),
    ("CT", "0885"),
    ("DS", "023"),
    ("PA", "00"),
    ("RA", "00"),
    ("VX", "0"),
    ("KS", "020"),
];

/// In-memory FT-991A implementing [`Transport`]
#[derive(Debug)]
pub struct SimulatedRig {
    frequency_a: u64,
    frequency_b: u64,
    mode: u8,
    ptt: bool,
    memory_channel: u16,
    memories: BTreeMap<u16, MemoryChannel>,
    settings: HashMap<&'static str, String>,
    replies: VecDeque<Vec<u8>>,
    journal: SimJournal,
    deaf: bool,
    closed: bool,
}

impl SimulatedRig {
    /// Create a rig with power-on defaults (7.100 MHz LSB)
    pub fn new() -> Self {
        Self::from_config(SimConfig::default())
    }

    /// Create a rig from configuration
    pub fn from_config(config: SimConfig) -> Self {
        Self {
            frequency_a: config.frequency_hz,
            frequency_b: config.frequency_hz,
            mode: config.mode,
            ptt: false,
            memory_channel: 1,
            memories: config.memories,
            settings: SETTINGS
                .iter()
                .map(|(code, value)| (*code, value.to_string()))
                .collect(),
            replies: VecDeque::new(),
            journal: SimJournal::new(),
            deaf: false,
            closed: false,
        }
    }

    /// Record writes into an existing journal instead of a fresh one
    pub fn with_journal(mut self, journal: SimJournal) -> Self {
        self.journal = journal;
        self
    }

    /// A rig that records writes but never answers, like one set to another baud rate
    pub fn deaf(mut self) -> Self {
        self.deaf = true;
        self
    }

    /// Handle to this rig's write journal
    pub fn journal(&self) -> SimJournal {
        self.journal.clone()
    }

    /// Current VFO-A frequency in Hz
    pub fn frequency_hz(&self) -> u64 {
        self.frequency_a
    }

    /// Current mode number
    pub fn mode(&self) -> u8 {
        self.mode
    }

    /// Whether the rig is transmitting
    pub fn ptt(&self) -> bool {
        self.ptt
    }

    fn reply(&mut self, line: String) {
        trace!("sim <- {}", line);
        self.replies.push_back(line.into_bytes());
    }

    fn apply(&mut self, command: &str) {
        let Some((code, payload)) = split_reply(command) else {
            trace!("sim ignores {:?}", command);
            return;
        };

        match (code, payload) {
            ("FA", "") => self.reply(format!("FA{:011};", self.frequency_a)),
            ("FA", hz) => {
                if let Ok(hz) = hz.parse() {
                    self.frequency_a = hz;
                }
            }
            ("FB", "") => self.reply(format!("FB{:011};", self.frequency_b)),
            ("FB", hz) => {
                if let Ok(hz) = hz.parse() {
                    self.frequency_b = hz;
                }
            }
            ("MD", "") => self.reply(format!("MD{:02};", self.mode)),
            ("MD", mode) => {
                if let Ok(mode) = mode.parse() {
                    self.mode = mode;
                }
            }
            ("IF", "") => self.reply(format!(
                "IF{:03}{:011}+00000{:02}0{}00;",
                self.memory_channel,
                self.frequency_a,
                self.mode,
                if self.ptt { 1 } else { 0 }
            )),
            ("SM", _) => self.reply("SM0050;".to_string()),
            ("TX", _) => self.ptt = true,
            ("RX", _) => self.ptt = false,
            ("MR", channel) => match channel.get(..3).and_then(|c| c.parse::<u16>().ok()) {
                Some(ch) => match self.memories.get(&ch).copied() {
                    Some(mem) => {
                        self.reply(format!("MR{:03}{:011}{:02};", ch, mem.frequency_hz, mem.mode));
                    }
                    None => self.reply("0;".to_string()),
                },
                None => self.reply("?;".to_string()),
            },
            ("MC", channel) => {
                if let Ok(ch) = channel.parse::<u16>() {
                    if let Some(mem) = self.memories.get(&ch).copied() {
                        self.memory_channel = ch;
                        self.frequency_a = mem.frequency_hz;
                        self.mode = mem.mode;
                        debug!("sim recalled memory {}", ch);
                    }
                }
            }
            ("EU", _) => self.frequency_a = self.frequency_a.saturating_add(100),
            ("ED", _) => self.frequency_a = self.frequency_a.saturating_sub(100),
            (code, payload) => {
                let known = self.settings.get_key_value(code).map(|(key, _)| *key);
                match (known, payload) {
                    (Some(key), "") => {
                        let line = format!("{}{};", key, self.settings[key]);
                        self.reply(line);
                    }
                    (Some(key), value) => {
                        self.settings.insert(key, value.to_string());
                    }
                    // Unknown commands stay silent, like a rig at the wrong rate
                    (None, _) => trace!("sim ignores {}{}", code, payload),
                }
            }
        }
    }
}

impl Default for SimulatedRig {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SimulatedRig {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed("simulator".into()));
        }

        let text = String::from_utf8_lossy(data).into_owned();
        self.journal.record(text.clone());
        // A new command discards unread answers, as the serial port drops stale input
        self.replies.clear();
        if self.deaf {
            return Ok(());
        }

        for command in text.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            self.apply(command);
        }
        Ok(())
    }

    async fn read_line(&mut self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed("simulator".into()));
        }
        Ok(self.replies.pop_front().unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        "FT-991A simulator".to_string()
    }
}
