//! Executes relay commands against the rig

use cat_codec::{encode_frequency, encode_raw, encode_set_mode, validate_raw};
use cat_relay::{RigCommand, RigReport};
use cat_transport::CatLink;
use tracing::{debug, warn};

use crate::poller::ParameterCache;

/// Run one command; queries produce the `response` report to send back
///
/// Writes are fire and forget. Queries answer from the cache and fall back
/// to asking the rig when the code has not been polled yet.
pub async fn execute(
    link: &CatLink,
    cache: &ParameterCache,
    command: &RigCommand,
) -> Option<RigReport> {
    if let Some(code) = command.query_code() {
        let reply = match cache.get(code) {
            Some(cached) => cached,
            None => link.query(code).await,
        };
        return Some(RigReport::response(reply));
    }

    let frame = match command {
        RigCommand::SetFrequency { frequency } => encode_frequency(*frequency),
        RigCommand::SetMode { mode } => encode_set_mode(*mode),
        RigCommand::PttOn => Ok(b"TX;".to_vec()),
        RigCommand::PttOff => Ok(b"RX;".to_vec()),
        RigCommand::Cat { data } => validate_raw(data).map(|body| encode_raw(&body)),
        RigCommand::GetFrequency | RigCommand::GetMode | RigCommand::GetSmeter => return None,
    };

    match frame {
        Ok(frame) => {
            debug!("-> rig {}", String::from_utf8_lossy(&frame));
            link.send(&frame).await;
        }
        Err(e) => warn!("Dropping {:?}: {}", command, e),
    }
    None
}
