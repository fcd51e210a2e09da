//! Connection registry
//!
//! Every live connection, the rigs they registered and the per-rig caches.
//! Owned by the relay actor; nothing here is shared between tasks.

use std::collections::{BTreeMap, HashMap, VecDeque};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

use crate::message::StatusUpdate;

/// Opaque identifier of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Role of a connection, fixed at handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    /// The authoritative link to a rig
    RigControl { callsign: String },
    /// An operator issuing commands
    OperatorControl {
        user: String,
        /// Account may hold a control grant
        may_operate: bool,
        /// Rig chosen with `select_rig`
        selected: Option<String>,
    },
    /// Audio coming from a rig
    RigAudio { callsign: String },
    /// A listener on a rig's audio
    AudioSubscriber { user: String, rig: String },
    /// Read-only value and memory broadcasts
    StatusSubscriber,
    /// An administrator watching the active-user list
    ActiveUsersSubscriber { user: String },
}

impl Connection {
    /// Username behind the connection, if any
    pub fn user(&self) -> Option<&str> {
        match self {
            Connection::OperatorControl { user, .. } | Connection::AudioSubscriber { user, .. } => {
                Some(user)
            }
            _ => None,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Connection::RigControl { .. } => "rig-control",
            Connection::OperatorControl { .. } => "operator-control",
            Connection::RigAudio { .. } => "rig-audio",
            Connection::AudioSubscriber { .. } => "audio-subscriber",
            Connection::StatusSubscriber => "status-subscriber",
            Connection::ActiveUsersSubscriber { .. } => "active-users-subscriber",
        }
    }
}

/// Something to write to a connection's socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
    Close,
}

#[derive(Debug)]
struct Entry {
    connection: Connection,
    tx: mpsc::Sender<Outbound>,
}

/// Relay-side mirror of one rig
#[derive(Debug)]
pub struct RigEntry {
    /// Connection currently registered for the callsign
    pub control: ConnId,
    seq: u64,
    /// Last value per CAT code
    pub values: BTreeMap<String, Value>,
    /// Last memory list, if one was reported
    pub memories: Option<Vec<u16>>,
    /// Operators awaiting a query reply, oldest first
    pub pending: VecDeque<ConnId>,
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnId, Entry>,
    rigs: HashMap<String, RigEntry>,
    rig_audio: HashMap<String, ConnId>,
    next_id: u64,
    next_seq: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection; returns its id and any rig-control connection it displaced
    pub fn insert(
        &mut self,
        connection: Connection,
        tx: mpsc::Sender<Outbound>,
    ) -> (ConnId, Option<ConnId>) {
        self.next_id += 1;
        let id = ConnId(self.next_id);

        let displaced = match &connection {
            Connection::RigControl { callsign } => {
                self.next_seq += 1;
                let entry = RigEntry {
                    control: id,
                    seq: self.next_seq,
                    values: BTreeMap::new(),
                    memories: None,
                    pending: VecDeque::new(),
                };
                let old = self.rigs.insert(callsign.clone(), entry).map(|old| old.control);
                if let Some(old) = old {
                    info!("Rig {} re-registered, displacing {}", callsign, old);
                }
                old
            }
            Connection::RigAudio { callsign } => self.rig_audio.insert(callsign.clone(), id),
            _ => None,
        };

        debug!("Registered {} as {}", id, connection.role());
        self.connections.insert(id, Entry { connection, tx });
        (id, displaced)
    }

    /// Drop a connection; returns its role
    ///
    /// A rig is only forgotten when the closing connection is the one
    /// currently registered for it.
    pub fn remove(&mut self, id: ConnId) -> Option<Connection> {
        let entry = self.connections.remove(&id)?;
        match &entry.connection {
            Connection::RigControl { callsign } => {
                if self.rigs.get(callsign).is_some_and(|rig| rig.control == id) {
                    self.rigs.remove(callsign);
                    info!("Rig {} unregistered", callsign);
                }
            }
            Connection::RigAudio { callsign } => {
                if self.rig_audio.get(callsign) == Some(&id) {
                    self.rig_audio.remove(callsign);
                }
            }
            _ => {}
        }
        for rig in self.rigs.values_mut() {
            rig.pending.retain(|waiting| *waiting != id);
        }
        debug!("Unregistered {} ({})", id, entry.connection.role());
        Some(entry.connection)
    }

    pub fn connection(&self, id: ConnId) -> Option<&Connection> {
        self.connections.get(&id).map(|e| &e.connection)
    }

    pub fn connection_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.connections.get_mut(&id).map(|e| &mut e.connection)
    }

    /// Whether another live connection belongs to `user`
    pub fn user_has_other(&self, user: &str, except: ConnId) -> bool {
        self.connections
            .iter()
            .any(|(id, e)| *id != except && e.connection.user() == Some(user))
    }

    /// Callsign this connection is the registered controller for
    pub fn controlled_rig(&self, id: ConnId) -> Option<&str> {
        match self.connection(id)? {
            Connection::RigControl { callsign }
                if self.rigs.get(callsign).is_some_and(|rig| rig.control == id) =>
            {
                Some(callsign)
            }
            _ => None,
        }
    }

    /// Callsign this connection streams audio for
    pub fn audio_rig(&self, id: ConnId) -> Option<&str> {
        match self.connection(id)? {
            Connection::RigAudio { callsign } if self.rig_audio.get(callsign) == Some(&id) => {
                Some(callsign)
            }
            _ => None,
        }
    }

    pub fn rig(&self, callsign: &str) -> Option<&RigEntry> {
        self.rigs.get(callsign)
    }

    pub fn rig_mut(&mut self, callsign: &str) -> Option<&mut RigEntry> {
        self.rigs.get_mut(callsign)
    }

    /// Registered callsigns in registration order
    pub fn rig_names(&self) -> Vec<String> {
        let mut rigs: Vec<(&String, u64)> = self.rigs.iter().map(|(k, r)| (k, r.seq)).collect();
        rigs.sort_by_key(|(_, seq)| *seq);
        rigs.into_iter().map(|(k, _)| k.clone()).collect()
    }

    /// The selection if it names a registered rig, else the oldest rig
    pub fn resolve_rig(&self, selected: Option<&str>) -> Option<String> {
        match selected {
            Some(rig) if self.rigs.contains_key(rig) => Some(rig.to_string()),
            _ => self
                .rigs
                .iter()
                .min_by_key(|(_, r)| r.seq)
                .map(|(k, _)| k.clone()),
        }
    }

    /// Connection streaming `callsign`'s audio
    pub fn rig_audio_for(&self, callsign: &str) -> Option<ConnId> {
        self.rig_audio.get(callsign).copied()
    }

    pub fn audio_subscribers(&self, callsign: &str) -> Vec<ConnId> {
        self.ids_where(|c| matches!(c, Connection::AudioSubscriber { rig, .. } if rig == callsign))
    }

    pub fn status_subscribers(&self) -> Vec<ConnId> {
        self.ids_where(|c| matches!(c, Connection::StatusSubscriber))
    }

    pub fn active_users_subscribers(&self) -> Vec<ConnId> {
        self.ids_where(|c| matches!(c, Connection::ActiveUsersSubscriber { .. }))
    }

    /// Operator connections belonging to `user`
    pub fn operator_connections(&self, user: &str) -> Vec<ConnId> {
        self.ids_where(
            |c| matches!(c, Connection::OperatorControl { user: u, .. } if u == user),
        )
    }

    fn ids_where(&self, pred: impl Fn(&Connection) -> bool) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self
            .connections
            .iter()
            .filter(|(_, e)| pred(&e.connection))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Cached state of every rig, values first, as status updates
    pub fn snapshot(&self) -> Vec<StatusUpdate> {
        let names = self.rig_names();
        let values = names.iter().filter_map(|name| {
            let rig = &self.rigs[name];
            (!rig.values.is_empty()).then(|| StatusUpdate::Values {
                rig: name.clone(),
                values: rig.values.clone(),
            })
        });
        let memories = names.iter().filter_map(|name| {
            self.rigs[name].memories.as_ref().map(|m| StatusUpdate::Memories {
                rig: name.clone(),
                memories: m.clone(),
            })
        });
        values.chain(memories).collect()
    }

    /// Queue a message for one connection
    ///
    /// Never waits: a full queue drops the message.
    pub fn send(&self, id: ConnId, msg: Outbound) -> bool {
        let Some(entry) = self.connections.get(&id) else {
            return false;
        };
        match entry.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue of {} full, dropping message", id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a text message for each of `ids`
    pub fn send_text_all(&self, ids: &[ConnId], text: &str) {
        for id in ids {
            self.send(*id, Outbound::Text(text.to_string()));
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn conn(registry: &mut Registry, connection: Connection) -> (ConnId, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(4);
        (registry.insert(connection, tx).0, rx)
    }

    fn rig(callsign: &str) -> Connection {
        Connection::RigControl {
            callsign: callsign.into(),
        }
    }

    #[test]
    fn test_fallback_rig_is_oldest() {
        let mut reg = Registry::new();
        assert_eq!(reg.resolve_rig(None), None);

        conn(&mut reg, rig("DL1ABC"));
        conn(&mut reg, rig("AA1A"));

        assert_eq!(reg.resolve_rig(None).as_deref(), Some("DL1ABC"));
        assert_eq!(reg.resolve_rig(Some("AA1A")).as_deref(), Some("AA1A"));
        assert_eq!(reg.resolve_rig(Some("gone")).as_deref(), Some("DL1ABC"));
        assert_eq!(reg.rig_names(), vec!["DL1ABC".to_string(), "AA1A".to_string()]);
    }

    #[test]
    fn test_stale_registration_is_displaced() {
        let mut reg = Registry::new();
        let (old, _rx1) = conn(&mut reg, rig("DL1ABC"));
        reg.rig_mut("DL1ABC").unwrap().values.insert("FA".into(), json!("FA00007100000"));

        let (tx, _rx2) = mpsc::channel(4);
        let (new, displaced) = reg.insert(rig("DL1ABC"), tx);
        assert_eq!(displaced, Some(old));
        assert!(reg.rig("DL1ABC").unwrap().values.is_empty());
        assert_eq!(reg.controlled_rig(old), None);
        assert_eq!(reg.controlled_rig(new), Some("DL1ABC"));

        // Closing the stale socket must not drop the new registration
        reg.remove(old);
        assert_eq!(reg.rig("DL1ABC").unwrap().control, new);

        reg.remove(new);
        assert!(reg.rig("DL1ABC").is_none());
    }

    #[test]
    fn test_remove_forgets_pending_queries() {
        let mut reg = Registry::new();
        conn(&mut reg, rig("DL1ABC"));
        let (op, _rx) = conn(
            &mut reg,
            Connection::OperatorControl {
                user: "alice".into(),
                may_operate: true,
                selected: None,
            },
        );
        reg.rig_mut("DL1ABC").unwrap().pending.push_back(op);

        assert!(reg.remove(op).is_some());
        assert!(reg.rig("DL1ABC").unwrap().pending.is_empty());
        assert!(reg.remove(op).is_none());
    }

    #[test]
    fn test_subscriber_sets() {
        let mut reg = Registry::new();
        let (a, _ra) = conn(
            &mut reg,
            Connection::AudioSubscriber {
                user: "alice".into(),
                rig: "DL1ABC".into(),
            },
        );
        conn(
            &mut reg,
            Connection::AudioSubscriber {
                user: "bob".into(),
                rig: "AA1A".into(),
            },
        );
        let (s, _rs) = conn(&mut reg, Connection::StatusSubscriber);

        assert_eq!(reg.audio_subscribers("DL1ABC"), vec![a]);
        assert_eq!(reg.status_subscribers(), vec![s]);
        assert!(reg.user_has_other("alice", s));
        assert!(!reg.user_has_other("alice", a));
    }

    #[test]
    fn test_snapshot_orders_values_before_memories() {
        let mut reg = Registry::new();
        conn(&mut reg, rig("DL1ABC"));
        conn(&mut reg, rig("AA1A"));
        reg.rig_mut("DL1ABC").unwrap().memories = Some(vec![0, 1]);
        reg.rig_mut("AA1A").unwrap().values.insert("MD".into(), json!("MD01"));

        let snapshot: Vec<Value> = reg
            .snapshot()
            .into_iter()
            .map(|u| serde_json::to_value(u).unwrap())
            .collect();
        assert_eq!(
            snapshot,
            vec![
                json!({"rig": "AA1A", "values": {"MD": "MD01"}}),
                json!({"rig": "DL1ABC", "memories": [0, 1]}),
            ]
        );
    }

    #[test]
    fn test_full_queue_drops() {
        let mut reg = Registry::new();
        let (tx, mut rx) = mpsc::channel(1);
        let (id, _) = reg.insert(Connection::StatusSubscriber, tx);

        assert!(reg.send(id, Outbound::Text("one".into())));
        assert!(!reg.send(id, Outbound::Text("two".into())));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("one".into()));
        assert!(!reg.send(ConnId(999), Outbound::Close));
    }
}
