//! JSON messages exchanged over the relay's WebSockets
//!
//! One JSON object per text frame. Audio travels as binary frames and never
//! passes through these types.

use std::collections::BTreeMap;

use cat_codec::{encode_frequency, encode_set_mode, validate_raw, CatCommand, EncodeCommand};
use cat_codec::EncoderDirection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::presence::ActiveUser;

/// Reply sent to operators when no rig is registered
pub const NO_TRANSCEIVER: &str = "no transceiver connected";

/// Role requested in a handshake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeMode {
    /// Authoritative rig-side control connection
    #[default]
    Trx,
    /// Operator issuing commands
    Operator,
    /// Rig-side audio stream
    TrxAudio,
}

impl HandshakeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeMode::Trx => "trx",
            HandshakeMode::Operator => "operator",
            HandshakeMode::TrxAudio => "trx_audio",
        }
    }
}

/// First message on every authenticated connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub mode: HandshakeMode,
}

/// Acknowledgement of a successful handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announce {
    pub callsign: String,
}

/// Anything a rig-control connection sends after its handshake
///
/// The fields are independent; one message may carry several.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RigReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_channels: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl RigReport {
    /// A report carrying only changed values
    pub fn values(values: BTreeMap<String, Value>) -> Self {
        Self {
            values: Some(values),
            ..Default::default()
        }
    }

    /// A report carrying the populated memory list
    pub fn memory_channels(channels: Vec<u16>) -> Self {
        Self {
            memory_channels: Some(channels),
            ..Default::default()
        }
    }

    /// A report answering one query
    pub fn response(reply: impl Into<Value>) -> Self {
        Self {
            response: Some(reply.into()),
            ..Default::default()
        }
    }
}

/// Commands the relay forwards to the rig-side agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RigCommand {
    SetFrequency { frequency: u64 },
    SetMode { mode: u8 },
    PttOn,
    PttOff,
    /// Raw CAT without the trailing terminator
    Cat { data: String },
    GetFrequency,
    GetMode,
    GetSmeter,
}

impl RigCommand {
    /// True for commands answered with a `response`
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            RigCommand::GetFrequency | RigCommand::GetMode | RigCommand::GetSmeter
        )
    }

    /// Parameter code a query reads
    pub fn query_code(&self) -> Option<&'static str> {
        match self {
            RigCommand::GetFrequency => Some("FA"),
            RigCommand::GetMode => Some("MD"),
            RigCommand::GetSmeter => Some("SM"),
            _ => None,
        }
    }
}

/// Commands an operator connection may send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OperatorCommand {
    SetFrequency { frequency: u64 },
    SetMode { mode: u8 },
    PttOn,
    PttOff,
    Cat { data: String },
    GetFrequency,
    GetMode,
    GetSmeter,
    Shift { value: u8 },
    Offset { offset: i32 },
    Ctcss { tone: f32 },
    Dcs { code: u16 },
    Encoder { direction: String },
    MicGain { gain: u16 },
    MemoryChannel { channel: u16 },
    TakeControl,
    ReleaseControl,
    SelectRig { rig: String },
    StatusInfo,
    Logout,
}

/// What the relay does with a validated operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorAction {
    /// Mutating command, needs the grant
    Forward(RigCommand),
    /// Read command, answered by the rig with a `response`
    Query(RigCommand),
    TakeControl,
    ReleaseControl,
    SelectRig(String),
    StatusInfo,
    Logout,
}

fn helper(cmd: CatCommand) -> Result<OperatorAction, ProtocolError> {
    let wire = cmd.encode()?;
    let data = String::from_utf8_lossy(&wire).trim_end_matches(';').to_string();
    Ok(OperatorAction::Forward(RigCommand::Cat { data }))
}

impl OperatorCommand {
    /// Parse one operator text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Validate arguments and lower typed helpers to `cat` passthrough
    pub fn into_action(self) -> Result<OperatorAction, ProtocolError> {
        use OperatorAction::{Forward, Query};

        match self {
            OperatorCommand::SetFrequency { frequency } => {
                encode_frequency(frequency)?;
                Ok(Forward(RigCommand::SetFrequency { frequency }))
            }
            OperatorCommand::SetMode { mode } => {
                encode_set_mode(mode)?;
                Ok(Forward(RigCommand::SetMode { mode }))
            }
            OperatorCommand::PttOn => Ok(Forward(RigCommand::PttOn)),
            OperatorCommand::PttOff => Ok(Forward(RigCommand::PttOff)),
            OperatorCommand::Cat { data } => Ok(Forward(RigCommand::Cat {
                data: validate_raw(&data)?,
            })),
            OperatorCommand::GetFrequency => Ok(Query(RigCommand::GetFrequency)),
            OperatorCommand::GetMode => Ok(Query(RigCommand::GetMode)),
            OperatorCommand::GetSmeter => Ok(Query(RigCommand::GetSmeter)),
            OperatorCommand::Shift { value } => helper(CatCommand::Shift(value)),
            OperatorCommand::Offset { offset } => helper(CatCommand::Offset(offset)),
            OperatorCommand::Ctcss { tone } => helper(CatCommand::CtcssTone(tone)),
            OperatorCommand::Dcs { code } => helper(CatCommand::DcsCode(code)),
            OperatorCommand::Encoder { direction } => {
                let direction = EncoderDirection::parse(&direction).ok_or_else(|| {
                    ProtocolError::InvalidArgument(format!("encoder direction {direction:?}"))
                })?;
                helper(CatCommand::Encoder(direction))
            }
            OperatorCommand::MicGain { gain } => helper(CatCommand::MicGain(gain)),
            OperatorCommand::MemoryChannel { channel } => {
                helper(CatCommand::MemoryChannel(channel))
            }
            OperatorCommand::TakeControl => Ok(OperatorAction::TakeControl),
            OperatorCommand::ReleaseControl => Ok(OperatorAction::ReleaseControl),
            OperatorCommand::SelectRig { rig } => Ok(OperatorAction::SelectRig(rig)),
            OperatorCommand::StatusInfo => Ok(OperatorAction::StatusInfo),
            OperatorCommand::Logout => Ok(OperatorAction::Logout),
        }
    }
}

/// Messages the relay sends to operator connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperatorReply {
    Response {
        response: Value,
    },
    Error {
        error: String,
    },
    StatusInfo {
        rigs: Vec<String>,
        selected: Option<String>,
        operator: Option<String>,
        operator_status: Option<String>,
        memories: Vec<u16>,
    },
}

/// Broadcast to status subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusUpdate {
    Values {
        rig: String,
        values: BTreeMap<String, Value>,
    },
    Memories {
        rig: String,
        memories: Vec<u16>,
    },
}

/// Pushed to active-user monitors whenever the list changes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveUsersUpdate {
    pub active_users: Vec<ActiveUser>,
}
