//! Rig relay
//!
//! Accepts one authoritative control connection per rig and any number of
//! operator, audio and status connections, and routes between them:
//!
//! - rig values and memory lists are cached and broadcast to status subscribers
//! - operator commands go to the selected rig, mutating ones only from the
//!   user holding that rig's control grant
//! - query replies return to the operator that asked, in order
//! - rig audio fans out to subscribers; subscriber audio reaches the rig only
//!   from the grant holder
//!
//! All shared state lives in one actor ([`actor::run_relay_actor`]).

pub mod account;
pub mod actor;
pub mod arbitrator;
pub mod config;
pub mod error;
pub mod message;
pub mod presence;
pub mod registry;
pub mod server;

pub use account::{hash_password, Account, AccountDirectory, FileAccounts, MemoryAccounts, Role};
pub use actor::{run_relay_actor, RelayCommand, RelayHandle};
pub use arbitrator::ControlArbitrator;
pub use error::{AuthorizationError, HandshakeError, ProtocolError, RelayError};
pub use message::{
    ActiveUsersUpdate, Announce, Handshake, HandshakeMode, OperatorAction, OperatorCommand, OperatorReply,
    RigCommand, RigReport, StatusUpdate, NO_TRANSCEIVER,
};
pub use presence::{ActiveUser, ActiveUsers, PresenceConfig, LIVENESS_WINDOW};
pub use registry::{ConnId, Connection, Outbound, Registry};
pub use server::{
    basic_credentials, bind, router, serve, validate_handshake, AppState, Endpoint, ServerConfig,
};
