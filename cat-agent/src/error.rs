//! Error types for the rig agent

use cat_transport::TransportError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors that end one relay session or stop the agent
#[derive(Debug, Error)]
pub enum AgentError {
    /// Could not reach the rig
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// WebSocket connect, read or write failed
    #[error("websocket: {0}")]
    WebSocket(Box<tungstenite::Error>),

    /// The relay closed the connection
    #[error("connection closed by relay")]
    Closed,

    /// An outbound message could not be serialized
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Sound card unavailable or failed
    #[error("audio: {0}")]
    Audio(String),
}

impl From<tungstenite::Error> for AgentError {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}
