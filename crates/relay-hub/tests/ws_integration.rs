//! End-to-end tests over real WebSocket connections.
//!
//! Each test binds the hub to `127.0.0.1:0` (the OS picks a free port),
//! runs the accept loop in a background task, and connects real
//! `tokio-tungstenite` clients to it.
//!
//! # Synchronising with the server
//!
//! The server adds a connection to the router just *after* the handshake
//! completes, so a client cannot assume it is routable the moment
//! `connect_async` returns.  [`sync`] sends a `list` request and waits for
//! the reply: once the reply arrives, every earlier message from that client
//! has been processed too.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};

use relay_core::SessionStatus;
use relay_hub::application::Router;
use relay_hub::domain::HubConfig;
use relay_hub::infrastructure::{bind_listener, serve};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Test helpers ──────────────────────────────────────────────────────────────

async fn start_hub() -> (SocketAddr, Arc<Router>, Arc<AtomicBool>) {
    let (addr, router, running, _server) = start_hub_with_handle().await;
    (addr, router, running)
}

async fn start_hub_with_handle() -> (SocketAddr, Arc<Router>, Arc<AtomicBool>, JoinHandle<()>) {
    let config = HubConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        lock_timeout: Duration::from_millis(500),
        ..HubConfig::default()
    };
    let router = Arc::new(Router::with_system_clock(&config));
    let running = Arc::new(AtomicBool::new(true));
    let listener = bind_listener(config.bind_addr).await.expect("bind");
    let addr = listener.local_addr().unwrap();

    let server_router = Arc::clone(&router);
    let server_running = Arc::clone(&running);
    let server = tokio::spawn(async move {
        serve(listener, server_router, server_running).await.unwrap();
    });

    (addr, router, running, server)
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let (ws, _response) = connect_async(format!("ws://{addr}/?{query}"))
        .await
        .expect("WebSocket connect");
    ws
}

/// Waits up to two seconds for the next text message and parses it.
async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("hub sends JSON");
        }
    }
}

async fn next_text(ws: &mut Client) -> String {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return text;
        }
    }
}

/// Round-trips a `list` request so everything sent before it has been routed.
async fn sync(observer: &mut Client) -> Value {
    observer
        .send(Message::Text(r#"{"type":"list"}"#.to_string()))
        .await
        .unwrap();
    loop {
        let msg = next_json(observer).await;
        if msg["type"] == "sessions" {
            return msg;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_producer_and_observer_round_trip() {
    let (addr, router, _running) = start_hub().await;

    // Arrange: an observer that is known to the router
    let mut panel = connect(addr, "role=observer").await;
    assert_eq!(sync(&mut panel).await["sessions"], serde_json::json!([]));

    // A phone that registers through its handshake URL
    let mut phone = connect(addr, "role=producer&deviceId=dev-1&model=Pixel").await;
    let online = next_json(&mut panel).await;
    assert_eq!(online["type"], "registry-changed");
    assert_eq!(online["deviceId"], "dev-1");
    assert_eq!(online["change"], "online");
    assert_eq!(online["sessions"][0]["metadata"]["model"], "Pixel");

    panel
        .send(Message::Text(r#"{"type":"watch","deviceId":"dev-1"}"#.to_string()))
        .await
        .unwrap();
    sync(&mut panel).await;

    // Act + Assert: a JSON frame arrives verbatim
    let frame = r#"{"type":"frame","deviceId":"dev-1","payload":"/9j/","width":100,"height":200,"timestamp":1}"#;
    phone.send(Message::Text(frame.to_string())).await.unwrap();
    assert_eq!(next_text(&mut panel).await, frame);

    // A binary frame arrives wrapped as `screen`
    phone.send(Message::Binary(b"hi".to_vec())).await.unwrap();
    let screen = next_json(&mut panel).await;
    assert_eq!(screen["type"], "screen");
    assert_eq!(screen["deviceId"], "dev-1");
    assert_eq!(screen["data"], "aGk=");

    // A control command reaches the phone verbatim
    let control = r#"{"type":"control","deviceId":"dev-1","action":"tap","x":10,"y":20}"#;
    panel.send(Message::Text(control.to_string())).await.unwrap();
    assert_eq!(next_text(&mut phone).await, control);

    // Closing the phone marks the device Offline for the panel
    phone.close(None).await.unwrap();
    let offline = next_json(&mut panel).await;
    assert_eq!(offline["change"], "offline");
    assert_eq!(offline["reason"], "disconnected");

    assert_eq!(router.stats().controls_delivered, 1);
}

#[tokio::test]
async fn test_malformed_message_keeps_connection_open() {
    let (addr, router, _running) = start_hub().await;
    let mut panel = connect(addr, "role=observer").await;

    panel
        .send(Message::Text("{not json".to_string()))
        .await
        .unwrap();
    panel
        .send(Message::Text(r#"{"type":"register","deviceId":"x"}"#.to_string()))
        .await
        .unwrap();

    // The connection still answers afterwards.
    let reply = sync(&mut panel).await;
    assert_eq!(reply["sessions"], serde_json::json!([]));
    assert_eq!(router.stats().malformed, 2);
}

#[tokio::test]
async fn test_unknown_role_is_refused_with_400() {
    let (addr, _router, _running) = start_hub().await;

    let result = connect_async(format!("ws://{addr}/?role=admin")).await;

    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 400),
        Err(e) => panic!("expected HTTP 400, got error {e}"),
        Ok(_) => panic!("expected HTTP 400, but the upgrade succeeded"),
    }
}

#[tokio::test]
async fn test_register_message_after_plain_producer_handshake() {
    let (addr, _router, _running) = start_hub().await;
    let mut panel = connect(addr, "role=observer").await;
    sync(&mut panel).await;

    let mut phone = connect(addr, "role=producer").await;
    phone
        .send(Message::Text(
            r#"{"type":"register","deviceId":"dev-7","metadata":{"sdk":34}}"#.to_string(),
        ))
        .await
        .unwrap();

    let online = next_json(&mut panel).await;
    assert_eq!(online["deviceId"], "dev-7");
    assert_eq!(online["sessions"][0]["metadata"]["sdk"], 34);
}

#[tokio::test]
async fn test_shutdown_takes_connected_devices_offline() {
    // Arrange: one registered phone and one panel
    let (addr, router, running, server) = start_hub_with_handle().await;
    let mut panel = connect(addr, "role=observer").await;
    sync(&mut panel).await;
    let _phone = connect(addr, "role=producer&deviceId=dev-1").await;
    assert_eq!(next_json(&mut panel).await["change"], "online");

    // Act
    running.store(false, Ordering::Relaxed);
    timeout(Duration::from_secs(10), server)
        .await
        .expect("server should stop after draining connections")
        .unwrap();

    // Assert: the phone's connection was cleaned up before the server returned
    let sessions = router.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Offline);
}
