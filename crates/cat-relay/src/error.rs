//! Error types for the relay

use thiserror::Error;

/// Reasons a connection is refused during its first message
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// First message missing, not JSON, or missing required fields
    #[error("malformed handshake: {0}")]
    Malformed(String),

    /// Unknown user or wrong password
    #[error("bad credentials for {0:?}")]
    BadCredentials(String),

    /// Account lacks the capability the requested mode needs
    #[error("user {user} may not connect as {mode}")]
    InsufficientCapability { user: String, mode: String },

    /// Endpoint is reserved for administrators
    #[error("user {0} is not an administrator")]
    NotAdmin(String),

    /// No handshake arrived in time
    #[error("handshake timed out after {0}ms")]
    Timeout(u64),
}

/// Problems with a message on an established connection
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not valid JSON or not a known message shape
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Argument does not fit its CAT field
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<cat_codec::EncodeError> for ProtocolError {
    fn from(e: cat_codec::EncodeError) -> Self {
        ProtocolError::InvalidArgument(e.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Malformed(e.to_string())
    }
}

/// A mutating command from a user who does not hold the rig's grant
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{user} does not hold control of {rig}")]
pub struct AuthorizationError {
    pub user: String,
    pub rig: String,
}

/// Errors surfaced by the relay service itself
#[derive(Debug, Error)]
pub enum RelayError {
    /// The relay actor is gone
    #[error("relay actor stopped")]
    ActorStopped,

    /// Account file could not be read or parsed
    #[error("failed to load accounts from {path}: {reason}")]
    Accounts { path: String, reason: String },

    /// Listener could not be bound
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
