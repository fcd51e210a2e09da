//! Relay actor
//!
//! Owns the registry, the control grants and the active-user records.
//! Connection tasks talk to it through a [`RelayHandle`]; it never awaits on
//! a socket, so one slow client cannot stall the others.
//!
//! # Example
//!
//! ```rust,ignore
//! use cat_relay::actor::{run_relay_actor, RelayHandle};
//! use cat_relay::presence::PresenceConfig;
//! use tokio::sync::mpsc;
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(256);
//! tokio::spawn(run_relay_actor(cmd_rx, PresenceConfig::default()));
//! let relay = RelayHandle::new(cmd_tx);
//! ```

use std::collections::BTreeMap;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::arbitrator::ControlArbitrator;
use crate::error::RelayError;
use crate::message::{
    ActiveUsersUpdate, OperatorAction, OperatorReply, RigCommand, RigReport, StatusUpdate,
    NO_TRANSCEIVER,
};
use crate::presence::{ActiveUser, ActiveUsers, PresenceConfig};
use crate::registry::{ConnId, Connection, Outbound, Registry};

/// Per-connection outbound queue depth
pub const OUTBOUND_QUEUE: usize = 256;

/// Commands sent to the relay actor
#[derive(Debug)]
pub enum RelayCommand {
    /// Add a connection after a successful handshake
    Register {
        connection: Connection,
        tx: mpsc::Sender<Outbound>,
        response: oneshot::Sender<ConnId>,
    },

    /// Connection closed
    Unregister { id: ConnId },

    /// Message from a rig-control connection
    RigReport { id: ConnId, report: RigReport },

    /// Validated command from an operator connection
    Operator { id: ConnId, action: OperatorAction },

    /// Audio frame from a rig
    RigAudio { id: ConnId, frame: Bytes },

    /// Audio frame from a subscriber
    SubscriberAudio { id: ConnId, frame: Bytes },

    /// Pong received, or plain liveness
    Heartbeat { id: ConnId, rtt_ms: Option<u64> },

    /// List live users
    ActiveUsers {
        response: oneshot::Sender<Vec<ActiveUser>>,
    },

    /// List registered rigs
    Rigs { response: oneshot::Sender<Vec<String>> },

    Shutdown,
}

/// Cloneable sender side of the relay actor
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    pub fn new(tx: mpsc::Sender<RelayCommand>) -> Self {
        Self { tx }
    }

    /// Spawn an actor and return its handle
    pub fn spawn() -> Self {
        Self::spawn_with(PresenceConfig::default())
    }

    /// Spawn an actor with its own liveness window and prune interval
    pub fn spawn_with(presence: PresenceConfig) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(run_relay_actor(rx, presence));
        Self::new(tx)
    }

    async fn send(&self, cmd: RelayCommand) -> Result<(), RelayError> {
        self.tx.send(cmd).await.map_err(|_| RelayError::ActorStopped)
    }

    /// Register a connection; returns its id and outbound queue
    pub async fn register(
        &self,
        connection: Connection,
    ) -> Result<(ConnId, mpsc::Receiver<Outbound>), RelayError> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (response, id) = oneshot::channel();
        self.send(RelayCommand::Register {
            connection,
            tx,
            response,
        })
        .await?;
        let id = id.await.map_err(|_| RelayError::ActorStopped)?;
        Ok((id, rx))
    }

    pub async fn unregister(&self, id: ConnId) -> Result<(), RelayError> {
        self.send(RelayCommand::Unregister { id }).await
    }

    pub async fn rig_report(&self, id: ConnId, report: RigReport) -> Result<(), RelayError> {
        self.send(RelayCommand::RigReport { id, report }).await
    }

    pub async fn operator(&self, id: ConnId, action: OperatorAction) -> Result<(), RelayError> {
        self.send(RelayCommand::Operator { id, action }).await
    }

    pub async fn rig_audio(&self, id: ConnId, frame: Bytes) -> Result<(), RelayError> {
        self.send(RelayCommand::RigAudio { id, frame }).await
    }

    pub async fn subscriber_audio(&self, id: ConnId, frame: Bytes) -> Result<(), RelayError> {
        self.send(RelayCommand::SubscriberAudio { id, frame }).await
    }

    pub async fn heartbeat(&self, id: ConnId, rtt_ms: Option<u64>) -> Result<(), RelayError> {
        self.send(RelayCommand::Heartbeat { id, rtt_ms }).await
    }

    pub async fn active_users(&self) -> Result<Vec<ActiveUser>, RelayError> {
        let (response, rx) = oneshot::channel();
        self.send(RelayCommand::ActiveUsers { response }).await?;
        rx.await.map_err(|_| RelayError::ActorStopped)
    }

    pub async fn rigs(&self) -> Result<Vec<String>, RelayError> {
        let (response, rx) = oneshot::channel();
        self.send(RelayCommand::Rigs { response }).await?;
        rx.await.map_err(|_| RelayError::ActorStopped)
    }

    pub async fn shutdown(&self) -> Result<(), RelayError> {
        self.send(RelayCommand::Shutdown).await
    }
}

/// Internal state for the relay actor
#[derive(Default)]
struct RelayState {
    registry: Registry,
    arbitrator: ControlArbitrator,
    users: ActiveUsers,
    /// Last list pushed to active-user monitors
    published: Vec<ActiveUser>,
}

fn to_text<T: Serialize>(msg: &T) -> Option<String> {
    match serde_json::to_string(msg) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to serialize outbound message: {}", e);
            None
        }
    }
}

impl RelayState {
    fn new(presence: PresenceConfig) -> Self {
        Self {
            users: ActiveUsers::with_window(presence.liveness_window),
            ..Default::default()
        }
    }

    fn reply(&self, id: ConnId, reply: &OperatorReply) {
        if let Some(text) = to_text(reply) {
            self.registry.send(id, Outbound::Text(text));
        }
    }

    fn broadcast(&self, update: &StatusUpdate) {
        if let Some(text) = to_text(update) {
            self.registry
                .send_text_all(&self.registry.status_subscribers(), &text);
        }
    }

    /// Prune the active-user list and push it to monitors if it changed
    fn publish_users(&mut self) -> Vec<ActiveUser> {
        let users = self.users.snapshot();
        if users != self.published {
            let update = ActiveUsersUpdate {
                active_users: users.clone(),
            };
            if let Some(text) = to_text(&update) {
                self.registry
                    .send_text_all(&self.registry.active_users_subscribers(), &text);
            }
            self.published = users.clone();
        }
        users
    }

    fn register(&mut self, connection: Connection, tx: mpsc::Sender<Outbound>) -> ConnId {
        let now = Instant::now();
        match &connection {
            Connection::OperatorControl { user, selected, .. } => {
                self.users.set_rig(user, now, selected.clone());
            }
            Connection::AudioSubscriber { user, .. } => self.users.touch(user, now, None),
            _ => {}
        }

        // Pushed before insert so a new monitor only gets the copy below
        let users = self.publish_users();
        let is_status = matches!(connection, Connection::StatusSubscriber);
        let is_monitor = matches!(connection, Connection::ActiveUsersSubscriber { .. });
        let (id, displaced) = self.registry.insert(connection, tx);

        if let Some(old) = displaced {
            self.registry.send(old, Outbound::Close);
        }

        if is_status {
            for update in self.registry.snapshot() {
                if let Some(text) = to_text(&update) {
                    self.registry.send(id, Outbound::Text(text));
                }
            }
        }

        if is_monitor {
            let update = ActiveUsersUpdate {
                active_users: users,
            };
            if let Some(text) = to_text(&update) {
                self.registry.send(id, Outbound::Text(text));
            }
        }
        id
    }

    fn unregister(&mut self, id: ConnId) {
        let was_controller = self.registry.controlled_rig(id).map(str::to_string);
        let Some(connection) = self.registry.remove(id) else {
            return;
        };

        if let Some(rig) = was_controller {
            // Cache and pending queries went with the registry entry
            self.arbitrator.clear(&rig);
        }

        if let Connection::OperatorControl { user, .. } = &connection {
            if self.registry.operator_connections(user).is_empty() {
                for rig in self.arbitrator.release_all(user) {
                    info!("{} disconnected, released {}", user, rig);
                }
            }
        }
    }

    fn rig_report(&mut self, id: ConnId, report: RigReport) {
        let Some(callsign) = self.registry.controlled_rig(id).map(str::to_string) else {
            debug!("Ignoring report from unregistered connection {}", id);
            return;
        };
        let Some(rig) = self.registry.rig_mut(&callsign) else {
            return;
        };

        let mut updates = Vec::new();
        if let Some(values) = report.values.filter(|v| !v.is_empty()) {
            rig.values
                .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
            updates.push(StatusUpdate::Values {
                rig: callsign.clone(),
                values,
            });
        }
        if let Some(memories) = report.memory_channels {
            rig.memories = Some(memories.clone());
            updates.push(StatusUpdate::Memories {
                rig: callsign.clone(),
                memories,
            });
        }
        let waiter = report.response.map(|response| (rig.pending.pop_front(), response));

        for update in &updates {
            self.broadcast(update);
        }
        match waiter {
            Some((Some(op), response)) => self.reply(op, &OperatorReply::Response { response }),
            Some((None, _)) => debug!("Unsolicited response from {}", callsign),
            None => {}
        }
    }

    /// Queue `cmd` for the rig's control connection; false if it was not queued
    fn forward(&self, rig: &str, cmd: &RigCommand) -> bool {
        let Some(control) = self.registry.rig(rig).map(|r| r.control) else {
            return false;
        };
        match to_text(cmd) {
            Some(text) => self.registry.send(control, Outbound::Text(text)),
            None => false,
        }
    }

    fn operator(&mut self, id: ConnId, action: OperatorAction) {
        let Some(Connection::OperatorControl {
            user,
            may_operate,
            selected,
        }) = self.registry.connection(id).cloned()
        else {
            debug!("Ignoring operator command from {}", id);
            return;
        };

        let rig = self.registry.resolve_rig(selected.as_deref());
        let no_rig = OperatorReply::Error {
            error: NO_TRANSCEIVER.to_string(),
        };

        match action {
            OperatorAction::Forward(cmd) => {
                let Some(rig) = rig else {
                    return self.reply(id, &no_rig);
                };
                match self.arbitrator.authorize(&rig, &user) {
                    Ok(()) => {
                        if !self.forward(&rig, &cmd) {
                            debug!("Could not forward {:?} to {}", cmd, rig);
                        }
                    }
                    Err(e) => debug!("Dropped {:?}: {}", cmd, e),
                }
            }
            OperatorAction::Query(cmd) => {
                let Some(rig) = rig else {
                    return self.reply(id, &no_rig);
                };
                // Only a query that reached the rig may wait for its answer
                if !self.forward(&rig, &cmd) {
                    debug!("Could not forward {:?} to {}", cmd, rig);
                    return;
                }
                if let Some(entry) = self.registry.rig_mut(&rig) {
                    entry.pending.push_back(id);
                }
            }
            OperatorAction::TakeControl => {
                let Some(rig) = rig else {
                    return self.reply(id, &no_rig);
                };
                if !may_operate {
                    debug!("{} is not approved to take control", user);
                } else if !self.arbitrator.take(&rig, &user) {
                    debug!(
                        "{} asked for {}, held by {:?}",
                        user,
                        rig,
                        self.arbitrator.holder(&rig)
                    );
                }
                self.status_info(id, &user, Some(rig));
            }
            OperatorAction::ReleaseControl => {
                if let Some(rig) = &rig {
                    self.arbitrator.release(rig, &user);
                }
                self.status_info(id, &user, rig);
            }
            OperatorAction::SelectRig(wanted) => {
                if self.registry.rig(&wanted).is_none() {
                    debug!("{} selected unknown rig {}", user, wanted);
                } else if let Some(Connection::OperatorControl { selected, .. }) =
                    self.registry.connection_mut(id)
                {
                    *selected = Some(wanted);
                }
                let current = match self.registry.connection(id) {
                    Some(Connection::OperatorControl { selected, .. }) => selected.clone(),
                    _ => None,
                };
                let rig = self.registry.resolve_rig(current.as_deref());
                self.status_info(id, &user, rig);
            }
            OperatorAction::StatusInfo => self.status_info(id, &user, rig),
            OperatorAction::Logout => {
                for rig in self.arbitrator.release_all(&user) {
                    info!("{} logged out, released {}", user, rig);
                }
                self.users.remove(&user);
                self.publish_users();
                self.registry.send(id, Outbound::Close);
            }
        }
    }

    fn status_info(&mut self, id: ConnId, user: &str, rig: Option<String>) {
        self.users.set_rig(user, Instant::now(), rig.clone());
        self.publish_users();

        let operator = rig
            .as_deref()
            .and_then(|r| self.arbitrator.holder(r))
            .map(str::to_string);
        let operator_status = operator.as_deref().map(|holder| {
            let approved = self.registry.operator_connections(holder).iter().any(|c| {
                matches!(
                    self.registry.connection(*c),
                    Some(Connection::OperatorControl {
                        may_operate: true,
                        ..
                    })
                )
            });
            let status = if approved { "Operator" } else { "SWL" };
            status.to_string()
        });
        let memories = rig
            .as_deref()
            .and_then(|r| self.registry.rig(r))
            .and_then(|r| r.memories.clone())
            .unwrap_or_default();

        self.reply(
            id,
            &OperatorReply::StatusInfo {
                rigs: self.registry.rig_names(),
                selected: rig,
                operator,
                operator_status,
                memories,
            },
        );
    }

    fn rig_audio(&self, id: ConnId, frame: Bytes) {
        let Some(callsign) = self.registry.audio_rig(id) else {
            return;
        };
        for sub in self.registry.audio_subscribers(callsign) {
            self.registry.send(sub, Outbound::Binary(frame.clone()));
        }
    }

    fn subscriber_audio(&self, id: ConnId, frame: Bytes) {
        let Some(Connection::AudioSubscriber { user, rig }) = self.registry.connection(id) else {
            return;
        };
        if !self.arbitrator.is_authorized(rig, user) {
            return;
        }
        if let Some(rig_audio) = self.registry.rig_audio_for(rig) {
            self.registry.send(rig_audio, Outbound::Binary(frame));
        }
    }

    fn heartbeat(&mut self, id: ConnId, rtt_ms: Option<u64>) {
        let (user, rig) = match self.registry.connection(id) {
            Some(Connection::OperatorControl { user, selected, .. }) => {
                (user.clone(), self.registry.resolve_rig(selected.as_deref()))
            }
            Some(Connection::AudioSubscriber { user, rig }) => (user.clone(), Some(rig.clone())),
            _ => return,
        };
        self.users.touch(&user, Instant::now(), rtt_ms);
        self.publish_users();

        if let (Some(rig), Some(rtt)) = (rig, rtt_ms) {
            self.broadcast(&StatusUpdate::Values {
                rig,
                values: BTreeMap::from([("RTT".to_string(), json!(rtt))]),
            });
        }
    }
}

/// Run the relay actor until shutdown or every handle is dropped
pub async fn run_relay_actor(mut cmd_rx: mpsc::Receiver<RelayCommand>, presence: PresenceConfig) {
    let mut state = RelayState::new(presence);
    info!("Relay actor started");

    // Prune presence even when nobody asks for it
    let mut prune_timer = interval(presence.prune_interval);
    prune_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break; };
                match cmd {
                    RelayCommand::Register { connection, tx, response } => {
                        let role = connection.role();
                        let id = state.register(connection, tx);
                        if response.send(id).is_err() {
                            // Caller vanished before it learned its id
                            state.unregister(id);
                        } else {
                            info!("Connection {} joined as {}", id, role);
                        }
                    }
                    RelayCommand::Unregister { id } => state.unregister(id),
                    RelayCommand::RigReport { id, report } => state.rig_report(id, report),
                    RelayCommand::Operator { id, action } => state.operator(id, action),
                    RelayCommand::RigAudio { id, frame } => state.rig_audio(id, frame),
                    RelayCommand::SubscriberAudio { id, frame } => state.subscriber_audio(id, frame),
                    RelayCommand::Heartbeat { id, rtt_ms } => state.heartbeat(id, rtt_ms),
                    RelayCommand::ActiveUsers { response } => {
                        let _ = response.send(state.publish_users());
                    }
                    RelayCommand::Rigs { response } => {
                        let _ = response.send(state.registry.rig_names());
                    }
                    RelayCommand::Shutdown => {
                        info!("Relay actor shutting down");
                        break;
                    }
                }
            }

            _ = prune_timer.tick() => {
                let before = state.published.len();
                let live = state.publish_users().len();
                if live != before {
                    debug!("{} active users, {} connections", live, state.registry.len());
                }
            }
        }
    }

    info!("Relay actor stopped");
}
