//! End-to-end relay scenarios over real WebSockets
//!
//! Each test starts a relay on an ephemeral port and drives it with
//! tokio-tungstenite clients playing the rig, operators and subscribers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cat_relay::{
    bind, serve, Account, AppState, MemoryAccounts, PresenceConfig, RelayHandle, Role,
    ServerConfig,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    pub struct Relay {
        pub addr: SocketAddr,
        shutdown: CancellationToken,
    }

    impl Drop for Relay {
        fn drop(&mut self) {
            self.shutdown.cancel();
        }
    }

    fn account(username: &str, approved: bool, trx: bool) -> Account {
        Account {
            username: username.into(),
            role: Role::Operator,
            approved,
            trx,
        }
    }

    pub async fn start_relay() -> Relay {
        start_relay_with(PresenceConfig::default()).await
    }

    pub async fn start_relay_with(presence: PresenceConfig) -> Relay {
        let admin = Account {
            role: Role::Admin,
            ..account("admin", true, false)
        };
        let accounts = MemoryAccounts::new()
            .with(account("station", true, true), "pw")
            .with(account("alice", true, false), "pw")
            .with(account("bob", true, false), "pw")
            .with(account("swl", false, false), "pw")
            .with(admin, "secret");

        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState {
            relay: RelayHandle::spawn_with(presence),
            accounts: Arc::new(accounts),
            config: ServerConfig {
                handshake_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        };
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, state, shutdown.clone()));
        Relay { addr, shutdown }
    }

    pub async fn connect(relay: &Relay, path: &str) -> Client {
        let (ws, _) = connect_async(format!("ws://{}{}", relay.addr, path))
            .await
            .unwrap();
        ws
    }

    pub async fn send_json(ws: &mut Client, value: Value) {
        ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    /// Next text frame as JSON, skipping control frames
    pub async fn recv_json(ws: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("stream ended")
                .expect("socket error");
            match msg {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Close(_) => panic!("closed while waiting for a message"),
                _ => continue,
            }
        }
    }

    /// Next binary frame, skipping control frames
    pub async fn recv_binary(ws: &mut Client) -> Vec<u8> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for audio")
                .expect("stream ended")
                .expect("socket error");
            if let Message::Binary(frame) = msg {
                return frame.to_vec();
            }
        }
    }

    /// True if the socket delivers no data frame within `wait`
    pub async fn stays_quiet(ws: &mut Client, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, ws.next()).await {
                Err(_) => return true,
                Ok(Some(Ok(Message::Text(_)))) | Ok(Some(Ok(Message::Binary(_)))) => return false,
                Ok(Some(Ok(_))) => continue,
                Ok(_) => return true,
            }
        }
    }

    /// True once the relay has closed the socket
    pub async fn is_closed(ws: &mut Client) -> bool {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    /// Rig-control connection announced as `callsign`
    pub async fn rig(relay: &Relay, callsign: &str) -> Client {
        let mut ws = connect(relay, "/ws/rig").await;
        send_json(
            &mut ws,
            json!({"callsign": callsign, "username": "station", "password": "pw", "mode": "trx"}),
        )
        .await;
        assert_eq!(recv_json(&mut ws).await, json!({"callsign": callsign}));
        ws
    }

    /// Operator connection for `user`
    pub async fn operator(relay: &Relay, user: &str) -> Client {
        let mut ws = connect(relay, "/ws/rig").await;
        send_json(
            &mut ws,
            json!({"username": user, "password": "pw", "mode": "operator"}),
        )
        .await;
        assert_eq!(
            recv_json(&mut ws).await,
            json!({"callsign": format!("op_{user}")})
        );
        ws
    }

    /// Send a command and wait for the `status_info`-shaped answer
    pub async fn command_with_info(ws: &mut Client, command: Value) -> Value {
        send_json(ws, command).await;
        recv_json(ws).await
    }
}

mod handshake_tests {
    use super::helpers::*;
    use super::*;

    #[tokio::test]
    async fn test_bad_password_is_closed() {
        let relay = start_relay().await;
        let mut ws = connect(&relay, "/ws/rig").await;
        send_json(
            &mut ws,
            json!({"callsign": "DL1ABC", "username": "station", "password": "wrong"}),
        )
        .await;
        assert!(is_closed(&mut ws).await);
    }

    #[tokio::test]
    async fn test_trx_without_capability_is_closed() {
        let relay = start_relay().await;
        let mut ws = connect(&relay, "/ws/rig").await;
        send_json(
            &mut ws,
            json!({"callsign": "DL1ABC", "username": "alice", "password": "pw", "mode": "trx"}),
        )
        .await;
        assert!(is_closed(&mut ws).await);
    }

    #[tokio::test]
    async fn test_malformed_handshake_is_closed() {
        let relay = start_relay().await;
        let mut ws = connect(&relay, "/ws/rig").await;
        ws.send(Message::Text("{not json".to_string().into())).await.unwrap();
        assert!(is_closed(&mut ws).await);
    }

    #[tokio::test]
    async fn test_silent_client_times_out() {
        let relay = start_relay().await;
        let mut ws = connect(&relay, "/ws/rig").await;
        assert!(is_closed(&mut ws).await);
    }
}

mod control_tests {
    use super::helpers::*;
    use super::*;

    #[tokio::test]
    async fn test_set_frequency_needs_grant() {
        let relay = start_relay().await;
        let mut rig_ws = rig(&relay, "DL1ABC").await;
        let mut op = operator(&relay, "alice").await;

        send_json(&mut op, json!({"command": "set_frequency", "frequency": 14_250_000})).await;

        let info = command_with_info(&mut op, json!({"command": "take_control"})).await;
        assert_eq!(info["operator"], json!("alice"));
        assert_eq!(info["selected"], json!("DL1ABC"));

        send_json(&mut op, json!({"command": "set_frequency", "frequency": 7_100_000})).await;
        assert_eq!(
            recv_json(&mut rig_ws).await,
            json!({"command": "set_frequency", "frequency": 7_100_000})
        );
    }

    #[tokio::test]
    async fn test_second_operator_cannot_take() {
        let relay = start_relay().await;
        let mut rig_ws = rig(&relay, "DL1ABC").await;
        let mut alice = operator(&relay, "alice").await;
        let mut bob = operator(&relay, "bob").await;

        command_with_info(&mut alice, json!({"command": "take_control"})).await;
        let info = command_with_info(&mut bob, json!({"command": "take_control"})).await;
        assert_eq!(info["operator"], json!("alice"));

        send_json(&mut bob, json!({"command": "ptt_on"})).await;
        assert!(stays_quiet(&mut rig_ws, Duration::from_millis(300)).await);

        // Alice leaving frees the rig for bob
        alice.close(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let info = command_with_info(&mut bob, json!({"command": "take_control"})).await;
        assert_eq!(info["operator"], json!("bob"));
    }

    #[tokio::test]
    async fn test_unapproved_user_only_listens() {
        let relay = start_relay().await;
        let _rig_ws = rig(&relay, "DL1ABC").await;
        let mut swl = operator(&relay, "swl").await;

        let info = command_with_info(&mut swl, json!({"command": "take_control"})).await;
        assert_eq!(info["operator"], Value::Null);
    }

    #[tokio::test]
    async fn test_typed_helper_reaches_rig_as_cat() {
        let relay = start_relay().await;
        let mut rig_ws = rig(&relay, "DL1ABC").await;
        let mut op = operator(&relay, "alice").await;
        command_with_info(&mut op, json!({"command": "take_control"})).await;

        send_json(&mut op, json!({"command": "ctcss", "tone": 88.5})).await;
        assert_eq!(
            recv_json(&mut rig_ws).await,
            json!({"command": "cat", "data": "CT0885"})
        );
    }

    #[tokio::test]
    async fn test_no_rig_answers_error() {
        let relay = start_relay().await;
        let mut op = operator(&relay, "alice").await;

        send_json(&mut op, json!({"command": "get_frequency"})).await;
        assert_eq!(
            recv_json(&mut op).await,
            json!({"error": "no transceiver connected"})
        );
    }

    #[tokio::test]
    async fn test_query_reply_routed_to_asker() {
        let relay = start_relay().await;
        let mut rig_ws = rig(&relay, "DL1ABC").await;
        let mut alice = operator(&relay, "alice").await;
        let mut bob = operator(&relay, "bob").await;

        // No grant needed to read
        send_json(&mut bob, json!({"command": "get_smeter"})).await;
        assert_eq!(recv_json(&mut rig_ws).await, json!({"command": "get_smeter"}));
        send_json(&mut rig_ws, json!({"response": "SM0050"})).await;

        assert_eq!(recv_json(&mut bob).await, json!({"response": "SM0050"}));
        assert!(stays_quiet(&mut alice, Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn test_logout_closes_and_releases() {
        let relay = start_relay().await;
        let _rig_ws = rig(&relay, "DL1ABC").await;
        let mut alice = operator(&relay, "alice").await;
        let mut bob = operator(&relay, "bob").await;
        command_with_info(&mut alice, json!({"command": "take_control"})).await;

        send_json(&mut alice, json!({"command": "logout"})).await;
        assert!(is_closed(&mut alice).await);

        let info = command_with_info(&mut bob, json!({"command": "take_control"})).await;
        assert_eq!(info["operator"], json!("bob"));
    }
}

mod status_tests {
    use super::helpers::*;
    use super::*;

    #[tokio::test]
    async fn test_late_subscribers_get_snapshot_then_live_updates() {
        let relay = start_relay().await;
        let mut rig_ws = rig(&relay, "DL1ABC").await;
        let mut early = connect(&relay, "/ws/status").await;

        send_json(&mut rig_ws, json!({"values": {"FA": "FA00007100000"}})).await;
        let update = json!({"rig": "DL1ABC", "values": {"FA": "FA00007100000"}});
        assert_eq!(recv_json(&mut early).await, update);

        let mut first = connect(&relay, "/ws/status").await;
        let mut second = connect(&relay, "/ws/status").await;
        assert_eq!(recv_json(&mut first).await, update);
        assert_eq!(recv_json(&mut second).await, update);

        send_json(&mut rig_ws, json!({"values": {"MD": "MD02"}})).await;
        let live = json!({"rig": "DL1ABC", "values": {"MD": "MD02"}});
        assert_eq!(recv_json(&mut first).await, live);
        assert_eq!(recv_json(&mut second).await, live);
    }

    #[tokio::test]
    async fn test_memories_broadcast_and_cleared_on_rig_close() {
        let relay = start_relay().await;
        let mut rig_ws = rig(&relay, "DL1ABC").await;
        let mut status = connect(&relay, "/ws/status").await;

        send_json(&mut rig_ws, json!({"memory_channels": [0, 1, 2]})).await;
        assert_eq!(
            recv_json(&mut status).await,
            json!({"rig": "DL1ABC", "memories": [0, 1, 2]})
        );

        rig_ws.close(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut late = connect(&relay, "/ws/status").await;
        assert!(stays_quiet(&mut late, Duration::from_millis(200)).await);
    }
}

mod audio_tests {
    use super::helpers::*;
    use super::*;

    async fn audio_link(relay: &Relay, path: &str, handshake: Value) -> Client {
        let mut ws = connect(relay, path).await;
        send_json(&mut ws, handshake).await;
        ws
    }

    #[tokio::test]
    async fn test_audio_fan_out_and_gated_uplink() {
        let relay = start_relay().await;
        let _rig_ws = rig(&relay, "DL1ABC").await;
        let mut rig_audio = audio_link(
            &relay,
            "/ws/rig_audio",
            json!({"callsign": "DL1ABC", "username": "station", "password": "pw", "mode": "trx_audio"}),
        )
        .await;
        let mut listener = audio_link(
            &relay,
            "/ws/audio",
            json!({"callsign": "DL1ABC", "username": "alice", "password": "pw"}),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        rig_audio
            .send(Message::Binary(vec![1u8, 2, 3, 4].into()))
            .await
            .unwrap();
        assert_eq!(recv_binary(&mut listener).await, vec![1, 2, 3, 4]);

        listener.send(Message::Binary(vec![9u8].into())).await.unwrap();
        assert!(stays_quiet(&mut rig_audio, Duration::from_millis(200)).await);

        let mut op = operator(&relay, "alice").await;
        command_with_info(&mut op, json!({"command": "take_control"})).await;
        listener.send(Message::Binary(vec![9u8].into())).await.unwrap();
        assert_eq!(recv_binary(&mut rig_audio).await, vec![9]);
    }
}

mod http_tests {
    use super::helpers::*;
    use super::*;

    async fn get(relay: &Relay, path: &str) -> String {
        get_with(relay, path, "").await
    }

    /// GET with extra header lines, each ending in CRLF
    async fn get_with(relay: &Relay, path: &str, headers: &str) -> String {
        let mut stream = TcpStream::connect(relay.addr).await.unwrap();
        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n{headers}\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_health_lists_rigs() {
        let relay = start_relay().await;
        let _rig_ws = rig(&relay, "DL1ABC").await;

        let response = get(&relay, "/health").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""rigs":["DL1ABC"]"#));
    }

    #[tokio::test]
    async fn test_active_users_lists_operators() {
        let relay = start_relay().await;
        let _op = operator(&relay, "alice").await;

        // admin:secret
        let response = get_with(
            &relay,
            "/active_users",
            "Authorization: Basic YWRtaW46c2VjcmV0\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#"["alice",null,null]"#));
    }

    #[tokio::test]
    async fn test_active_users_needs_credentials() {
        let relay = start_relay().await;
        let _op = operator(&relay, "alice").await;

        let response = get(&relay, "/active_users").await;
        assert!(response.starts_with("HTTP/1.1 401"));
        assert!(!response.contains("alice"));

        // admin:wrong
        let response = get_with(
            &relay,
            "/active_users",
            "Authorization: Basic YWRtaW46d3Jvbmc=\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 401"));
    }

    #[tokio::test]
    async fn test_active_users_refuses_non_admin() {
        let relay = start_relay().await;
        let _op = operator(&relay, "alice").await;

        // alice:pw
        let response = get_with(
            &relay,
            "/active_users",
            "Authorization: Basic YWxpY2U6cHc=\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 403"));
        assert!(!response.contains(r#"["alice""#));
    }
}

mod presence_tests {
    use super::helpers::*;
    use super::*;

    async fn monitor(relay: &Relay) -> Client {
        let mut ws = connect(relay, "/ws/active_users").await;
        send_json(&mut ws, json!({"username": "admin", "password": "secret"})).await;
        ws
    }

    #[tokio::test]
    async fn test_monitor_sees_user_appear_then_pruned() {
        let relay = start_relay_with(PresenceConfig {
            liveness_window: Duration::from_millis(300),
            prune_interval: Duration::from_millis(50),
        })
        .await;
        let mut watch = monitor(&relay).await;
        assert_eq!(recv_json(&mut watch).await, json!({"active_users": []}));

        // Pings are 5 s apart, so nothing refreshes alice after the handshake
        let _op = operator(&relay, "alice").await;
        assert_eq!(
            recv_json(&mut watch).await,
            json!({"active_users": [["alice", null, null]]})
        );

        assert_eq!(recv_json(&mut watch).await, json!({"active_users": []}));
    }

    #[tokio::test]
    async fn test_monitor_needs_admin() {
        let relay = start_relay().await;
        let mut ws = connect(&relay, "/ws/active_users").await;
        send_json(&mut ws, json!({"username": "alice", "password": "pw"})).await;
        assert!(is_closed(&mut ws).await);
    }
}
