//! HTTP and WebSocket front door
//!
//! | Path | Role |
//! |------|------|
//! | `/ws/rig` | rig control (`mode: "trx"`) or operator (`mode: "operator"`) |
//! | `/ws/rig_audio` | audio from a rig |
//! | `/ws/audio` | audio subscriber |
//! | `/ws/status` | value and memory broadcasts, no handshake |
//! | `/ws/active_users` | `{"active_users": [...]}` pushes, admin handshake |
//! | `/health` | liveness and registered rigs |
//! | `/active_users` | `[username, rtt_ms, rig]` for live users, admin Basic auth |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::account::{AccountDirectory, Role};
use crate::actor::RelayHandle;
use crate::error::{HandshakeError, RelayError};
use crate::message::{Handshake, HandshakeMode, OperatorCommand, RigReport};
use crate::registry::{ConnId, Connection, Outbound};

/// Longest callsign accepted in a handshake
pub const MAX_CALLSIGN_LEN: usize = 32;

/// Connection timing
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Time allowed for the first message
    pub handshake_timeout: Duration,
    /// Interval between pings on operator-facing connections
    pub ping_interval: Duration,
    /// Unanswered ping older than this drops the connection
    pub pong_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared by every route
#[derive(Clone)]
pub struct AppState {
    pub relay: RelayHandle,
    pub accounts: Arc<dyn AccountDirectory>,
    pub config: ServerConfig,
}

/// Which WebSocket path a handshake arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Rig,
    RigAudio,
    Audio,
    ActiveUsers,
}

/// Outcome of a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub connection: Connection,
    /// Name echoed back in the `{callsign}` acknowledgement
    pub callsign: String,
}

fn check_callsign(callsign: &str) -> Result<(), HandshakeError> {
    let ok = !callsign.is_empty()
        && callsign.len() <= MAX_CALLSIGN_LEN
        && callsign
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/'));
    if ok {
        Ok(())
    } else {
        Err(HandshakeError::Malformed(format!("bad callsign {callsign:?}")))
    }
}

/// Check a first message against the account lookup and decide the role
pub fn validate_handshake(
    text: &str,
    endpoint: Endpoint,
    accounts: &dyn AccountDirectory,
) -> Result<Admitted, HandshakeError> {
    let handshake: Handshake =
        serde_json::from_str(text).map_err(|e| HandshakeError::Malformed(e.to_string()))?;

    let (Some(username), Some(password)) = (
        handshake.username.filter(|u| !u.is_empty()),
        handshake.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(HandshakeError::Malformed("missing credentials".into()));
    };
    if let Some(callsign) = &handshake.callsign {
        check_callsign(callsign)?;
    }

    let account = accounts
        .authenticate(&username, &password)
        .ok_or_else(|| HandshakeError::BadCredentials(username.clone()))?;

    let needs_trx = match (endpoint, handshake.mode) {
        (Endpoint::Rig, HandshakeMode::Trx) | (Endpoint::RigAudio, _) => true,
        (Endpoint::Rig, HandshakeMode::TrxAudio) => {
            return Err(HandshakeError::Malformed(
                "trx_audio is only accepted on the audio path".into(),
            ))
        }
        _ => false,
    };
    if needs_trx && !account.trx {
        return Err(HandshakeError::InsufficientCapability {
            user: username,
            mode: handshake.mode.as_str().to_string(),
        });
    }

    let admitted = match (endpoint, handshake.mode) {
        (Endpoint::Rig, HandshakeMode::Operator) => Admitted {
            callsign: handshake
                .callsign
                .clone()
                .unwrap_or_else(|| format!("op_{username}")),
            connection: Connection::OperatorControl {
                may_operate: account.may_operate(),
                selected: handshake.callsign,
                user: username,
            },
        },
        (Endpoint::Rig, _) => {
            let callsign = handshake.callsign.unwrap_or_else(|| username.clone());
            Admitted {
                connection: Connection::RigControl {
                    callsign: callsign.clone(),
                },
                callsign,
            }
        }
        (Endpoint::RigAudio, _) => {
            let callsign = handshake.callsign.unwrap_or_else(|| username.clone());
            Admitted {
                connection: Connection::RigAudio {
                    callsign: callsign.clone(),
                },
                callsign,
            }
        }
        (Endpoint::Audio, _) => {
            let rig = handshake.callsign.ok_or_else(|| {
                HandshakeError::Malformed("audio subscription needs a callsign".into())
            })?;
            Admitted {
                connection: Connection::AudioSubscriber {
                    user: username,
                    rig: rig.clone(),
                },
                callsign: rig,
            }
        }
        (Endpoint::ActiveUsers, _) => {
            if account.role != Role::Admin {
                return Err(HandshakeError::NotAdmin(username));
            }
            Admitted {
                connection: Connection::ActiveUsersSubscriber {
                    user: username.clone(),
                },
                callsign: username,
            }
        }
    };
    Ok(admitted)
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/rig", get(rig_handler))
        .route("/ws/rig_audio", get(rig_audio_handler))
        .route("/ws/audio", get(audio_handler))
        .route("/ws/status", get(status_handler))
        .route("/ws/active_users", get(active_users_ws_handler))
        .route("/health", get(health_handler))
        .route("/active_users", get(active_users_handler))
        .with_state(state)
}

/// Bind the listener; port 0 picks a free port
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, RelayError> {
    TcpListener::bind(addr).await.map_err(|e| RelayError::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    })
}

/// Serve until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), RelayError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Relay listening on {}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn rig_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_authenticated(socket, state, Endpoint::Rig))
}

async fn rig_audio_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_authenticated(socket, state, Endpoint::RigAudio))
}

async fn audio_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_authenticated(socket, state, Endpoint::Audio))
}

async fn active_users_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_authenticated(socket, state, Endpoint::ActiveUsers))
}

async fn status_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        match state.relay.register(Connection::StatusSubscriber).await {
            Ok((id, rx)) => run_connection(socket, &state, id, Connection::StatusSubscriber, rx).await,
            Err(e) => warn!("Status subscriber refused: {}", e),
        }
    })
}

async fn health_handler(State(state): State<AppState>) -> Response {
    match state.relay.rigs().await {
        Ok(rigs) => Json(json!({"status": "ok", "rigs": rigs})).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

/// Username and password from an `Authorization: Basic` header
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

async fn active_users_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let account = basic_credentials(&headers)
        .and_then(|(username, password)| state.accounts.authenticate(&username, &password));
    match account {
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"riglink\"")],
            )
                .into_response()
        }
        Some(account) if account.role != Role::Admin => {
            debug!("{} may not list active users", account.username);
            return StatusCode::FORBIDDEN.into_response();
        }
        Some(_) => {}
    }

    match state.relay.active_users().await {
        Ok(users) => Json(users).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn read_handshake(
    socket: &mut WebSocket,
    limit: Duration,
) -> Result<String, HandshakeError> {
    let first = timeout(limit, socket.recv())
        .await
        .map_err(|_| HandshakeError::Timeout(limit.as_millis() as u64))?;
    match first {
        Some(Ok(Message::Text(text))) => Ok(text.as_str().to_string()),
        Some(Ok(other)) => Err(HandshakeError::Malformed(format!(
            "expected a text frame, got {other:?}"
        ))),
        Some(Err(e)) => Err(HandshakeError::Malformed(e.to_string())),
        None => Err(HandshakeError::Malformed("closed before handshake".into())),
    }
}

async fn handle_authenticated(mut socket: WebSocket, state: AppState, endpoint: Endpoint) {
    let admitted = match read_handshake(&mut socket, state.config.handshake_timeout).await {
        Ok(text) => validate_handshake(&text, endpoint, state.accounts.as_ref()),
        Err(e) => Err(e),
    };
    let Admitted {
        connection,
        callsign,
    } = match admitted {
        Ok(admitted) => admitted,
        Err(e) => {
            warn!("Handshake on {:?} refused: {}", endpoint, e);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (id, rx) = match state.relay.register(connection.clone()).await {
        Ok(registered) => registered,
        Err(e) => {
            warn!("Cannot register {}: {}", callsign, e);
            return;
        }
    };
    info!("{} connected as {} ({})", callsign, connection.role(), id);

    if endpoint == Endpoint::Rig {
        let ack = json!({ "callsign": callsign }).to_string();
        if socket.send(Message::Text(ack.into())).await.is_err() {
            let _ = state.relay.unregister(id).await;
            return;
        }
    }

    run_connection(socket, &state, id, connection, rx).await;
    info!("{} disconnected ({})", callsign, id);
}

/// Pump one registered connection until either side closes
///
/// Always unregisters before returning.
async fn run_connection(
    socket: WebSocket,
    state: &AppState,
    id: ConnId,
    connection: Connection,
    mut rx: mpsc::Receiver<Outbound>,
) {
    let (mut sink, mut stream) = socket.split();

    let heartbeats = matches!(
        connection,
        Connection::OperatorControl { .. } | Connection::AudioSubscriber { .. }
    );
    let mut ping_timer = interval(state.config.ping_interval);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ping_timer.tick().await;
    let mut ping_sent: Option<Instant> = None;

    loop {
        tokio::select! {
            msg = stream.next() => {
                let forwarded = match msg {
                    Some(Ok(Message::Text(text))) => on_text(state, id, &connection, text.as_str()).await,
                    Some(Ok(Message::Binary(frame))) => on_binary(state, id, &connection, frame).await,
                    Some(Ok(Message::Pong(_))) => {
                        let rtt = ping_sent.take().map(|sent| sent.elapsed().as_millis() as u64);
                        state.relay.heartbeat(id, rtt).await
                    }
                    Some(Ok(Message::Ping(_))) => Ok(()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Socket error on {}: {}", id, e);
                        break;
                    }
                };
                if forwarded.is_err() {
                    warn!("Relay actor gone, closing {}", id);
                    break;
                }
            }

            out = rx.recv() => {
                let msg = match out {
                    Some(Outbound::Text(text)) => Message::Text(text.into()),
                    Some(Outbound::Binary(frame)) => Message::Binary(frame),
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if sink.send(msg).await.is_err() {
                    break;
                }
            }

            _ = ping_timer.tick(), if heartbeats => {
                match ping_sent {
                    Some(sent) if sent.elapsed() > state.config.pong_timeout => {
                        warn!("No pong from {} in {:?}, dropping", id, state.config.pong_timeout);
                        break;
                    }
                    Some(_) => {}
                    None => {
                        ping_sent = Some(Instant::now());
                        if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    if let Err(e) = state.relay.unregister(id).await {
        debug!("Unregister {} after close: {}", id, e);
    }
}

async fn on_text(
    state: &AppState,
    id: ConnId,
    connection: &Connection,
    text: &str,
) -> Result<(), RelayError> {
    match connection {
        Connection::RigControl { .. } => match serde_json::from_str::<RigReport>(text) {
            Ok(report) => state.relay.rig_report(id, report).await,
            Err(e) => {
                debug!("Ignoring malformed report from {}: {}", id, e);
                Ok(())
            }
        },
        Connection::OperatorControl { .. } => {
            match OperatorCommand::parse(text).and_then(OperatorCommand::into_action) {
                Ok(action) => state.relay.operator(id, action).await,
                Err(e) => {
                    debug!("Ignoring command from {}: {}", id, e);
                    Ok(())
                }
            }
        }
        _ => Ok(()),
    }
}

async fn on_binary(
    state: &AppState,
    id: ConnId,
    connection: &Connection,
    frame: Bytes,
) -> Result<(), RelayError> {
    match connection {
        Connection::RigAudio { .. } => state.relay.rig_audio(id, frame).await,
        Connection::AudioSubscriber { .. } => state.relay.subscriber_audio(id, frame).await,
        _ => Ok(()),
    }
}
