//! Parameter polling
//!
//! A battery is a list of two-letter read codes issued back to back under one
//! transport lock. Replies are compared against [`ParameterCache`] and only
//! the codes whose value moved are reported.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cat_codec::queries::{MEMORY_SCAN, STARTUP_QUERIES};
use cat_codec::{is_populated_memory, CatCommand, EncodeCommand};
use cat_transport::CatLink;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Changed values keyed by command code
pub type Changes = BTreeMap<String, String>;

/// Last known reply for every polled code
#[derive(Debug, Clone, Default)]
pub struct ParameterCache {
    values: Arc<Mutex<BTreeMap<String, String>>>,
}

impl ParameterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, code: &str) -> Option<String> {
        self.lock().get(code).cloned()
    }

    /// Store `reply` for `code`; true when it differs from the cached value
    pub fn update(&self, code: &str, reply: &str) -> bool {
        let mut values = self.lock();
        if values.get(code).map(String::as_str) == Some(reply) {
            return false;
        }
        values.insert(code.to_string(), reply.to_string());
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A poisoned map still holds valid strings
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// What the rig reported when a control session started
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Startup {
    pub values: Changes,
    pub memories: Vec<u16>,
}

/// Run the startup battery and the memory scan in one lock hold
///
/// Non-empty replies seed the cache so the first periodic poll only reports
/// real changes.
pub async fn startup(link: &CatLink, cache: &ParameterCache) -> Startup {
    let mut result = Startup::default();
    let mut session = link.session().await;

    for code in STARTUP_QUERIES {
        let reply = session.query(code).await;
        debug!("Startup {} -> {:?}", code, reply);
        if !reply.is_empty() {
            cache.update(code, &reply);
            result.values.insert(code.to_string(), reply);
        }
    }

    for channel in MEMORY_SCAN {
        let frame = match CatCommand::MemoryRead(channel).encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping memory {}: {}", channel, e);
                continue;
            }
        };
        let reply = session.exchange(&frame).await;
        if is_populated_memory(&reply) {
            result.memories.push(channel);
        }
    }

    info!(
        "Startup read {} values and {} memory channels from {}",
        result.values.len(),
        result.memories.len(),
        link.describe()
    );
    result
}

/// Issue one battery and return the codes whose reply changed
pub async fn poll_once(link: &CatLink, cache: &ParameterCache, queries: &[String]) -> Changes {
    let mut changes = Changes::new();
    let mut session = link.session().await;
    for code in queries {
        let reply = session.query(code).await;
        if reply.is_empty() {
            continue;
        }
        if cache.update(code, &reply) {
            changes.insert(code.clone(), reply);
        }
    }
    changes
}

/// Poll every `period` until cancelled, sending non-empty change sets
///
/// Cancellation is only checked between batteries. Exits early when the
/// receiver is gone.
pub async fn run_poller(
    link: CatLink,
    cache: ParameterCache,
    queries: Vec<String>,
    period: Duration,
    changes_tx: mpsc::Sender<Changes>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; startup already read the rig
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let changes = poll_once(&link, &cache, &queries).await;
        if changes.is_empty() {
            continue;
        }
        debug!("Poll changed {:?}", changes.keys().collect::<Vec<_>>());
        if changes_tx.send(changes).await.is_err() {
            break;
        }
    }
    debug!("Poller stopped");
}
