//! Rig-control link to the relay
//!
//! One session is: connect, handshake, report the startup battery and the
//! memory list, then serve relay commands while the poller streams changes.
//! Any error or close ends the session; the loop waits a fixed delay and
//! dials again, forever.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use cat_relay::{Handshake, RigCommand, RigReport};
use cat_transport::CatLink;
use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::executor::execute;
use crate::poller::{self, run_poller, Changes, ParameterCache};

/// Everything a control session needs besides the rig
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub url: String,
    pub handshake: Handshake,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    pub ping_interval: Duration,
    pub queries: Vec<String>,
}

/// Keep a control session up until `cancel` fires
pub async fn run_control_loop(link: CatLink, config: ControlConfig, cancel: CancellationToken) {
    loop {
        match run_session(&link, &config, &cancel).await {
            Ok(()) => info!("Control session to {} ended", config.url),
            Err(e) => warn!(
                "Connection error ({}), retrying in {:?}",
                e, config.retry_delay
            ),
        }
        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(config.retry_delay) => {}
        }
    }
    debug!("Control loop stopped");
}

/// One connection's lifetime; returns `Ok` only when cancelled
pub async fn run_session(
    link: &CatLink,
    config: &ControlConfig,
    cancel: &CancellationToken,
) -> Result<(), AgentError> {
    let (ws, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        connected = connect_async(config.url.as_str()) => connected?,
    };
    info!("Connected to {}", config.url);
    let (mut sink, mut stream) = ws.split();

    send_json(&mut sink, &config.handshake).await?;

    let cache = ParameterCache::new();
    let boot = poller::startup(link, &cache).await;
    if !boot.values.is_empty() {
        send_json(&mut sink, &RigReport::values(to_values(boot.values))).await?;
    }
    if !boot.memories.is_empty() {
        send_json(&mut sink, &RigReport::memory_channels(boot.memories)).await?;
    }

    let (changes_tx, mut changes_rx) = mpsc::channel::<Changes>(16);
    let poll_cancel = cancel.child_token();
    let poller = tokio::spawn(run_poller(
        link.clone(),
        cache.clone(),
        config.queries.clone(),
        config.poll_interval,
        changes_tx,
        poll_cancel.clone(),
    ));

    let mut ping = interval(config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ping_sent: Option<Instant> = None;

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                break Ok(());
            }
            Some(changes) = changes_rx.recv() => {
                if let Err(e) = send_json(&mut sink, &RigReport::values(to_values(changes))).await {
                    break Err(e);
                }
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    break Err(e.into());
                }
                ping_sent = Some(Instant::now());
            }
            msg = stream.next() => {
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => match parse_command(text.as_str()) {
                        Some(command) => execute(link, &cache, &command).await,
                        None => None,
                    },
                    Some(Ok(Message::Pong(_))) => ping_sent.take().map(|start| {
                        let rtt = start.elapsed().as_millis() as u64;
                        RigReport::values(BTreeMap::from([("RTT".to_string(), Value::from(rtt))]))
                    }),
                    Some(Ok(Message::Close(_))) | None => break Err(AgentError::Closed),
                    Some(Ok(_)) => None,
                    Some(Err(e)) => break Err(e.into()),
                };
                if let Some(reply) = reply {
                    if let Err(e) = send_json(&mut sink, &reply).await {
                        break Err(e);
                    }
                }
            }
        }
    };

    poll_cancel.cancel();
    if let Err(e) = poller.await {
        warn!("Poller task failed: {}", e);
    }
    result
}

/// Relay commands; anything else on the socket, such as the handshake ack, is ignored
fn parse_command(text: &str) -> Option<RigCommand> {
    match serde_json::from_str::<RigCommand>(text) {
        Ok(command) => {
            debug!("<- relay {:?}", command);
            Some(command)
        }
        Err(e) => {
            debug!("Ignoring relay message {}: {}", text, e);
            None
        }
    }
}

fn to_values(changes: Changes) -> BTreeMap<String, Value> {
    changes
        .into_iter()
        .map(|(code, reply)| (code, Value::String(reply)))
        .collect()
}

pub(crate) async fn send_json<S, T>(sink: &mut S, message: &T) -> Result<(), AgentError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
    T: serde::Serialize,
{
    let text = serde_json::to_string(message)?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command(r#"{"command":"set_frequency","frequency":7100000}"#),
            Some(RigCommand::SetFrequency { frequency: 7_100_000 })
        );
        assert_eq!(
            parse_command(r#"{"command":"cat","data":"PC050"}"#),
            Some(RigCommand::Cat {
                data: "PC050".to_string()
            })
        );
        assert_eq!(parse_command(r#"{"callsign":"DL1ABC"}"#), None);
        assert_eq!(parse_command(r#"{"command":"take_control"}"#), None);
        assert_eq!(parse_command("not json"), None);
    }

    #[test]
    fn test_values_are_json_strings() {
        let values = to_values(Changes::from([("FA".to_string(), "FA00007100000".to_string())]));
        assert_eq!(
            serde_json::to_value(RigReport::values(values)).unwrap(),
            serde_json::json!({"values": {"FA": "FA00007100000"}})
        );
    }
}
