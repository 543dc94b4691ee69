//! Integration tests for the server lifecycle and the WebSocket endpoint.
//!
//! Each test spins up a real server on an ephemeral port via
//! [`run_server_with_config`], exercises it, and shuts it down cleanly.
//! Background liveness sweeps stay off; liveness is unit-tested against the
//! registry directly.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use mirador::server::startup::{run_server_with_config, ServerConfig, ServerHandle};
use mirador::server::GatewayState;

const SECRET: &str = "integration-test-secret";

async fn start_test_server() -> ServerHandle {
    let state = Arc::new(GatewayState::for_testing(SECRET));
    let config = ServerConfig::for_testing(state);
    run_server_with_config(config).await.unwrap()
}

/// Register a user over HTTP and log in; returns (user id, token).
async fn register_and_login(
    client: &reqwest::Client,
    base: &str,
    email: &str,
    role: &str,
) -> (String, String) {
    let resp = client
        .post(format!("{base}/auth/register"))
        .json(&json!({ "email": email, "password": "hunter22", "role": role }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "register failed for {email}");
    let body: Value = resp.json().await.unwrap();
    let id = body["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{base}/auth/login"))
        .json(&json!({ "email": email, "password": "hunter22" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "login failed for {email}");
    let body: Value = resp.json().await.unwrap();
    (id, body["token"].as_str().unwrap().to_string())
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Connect a WebSocket client and consume the connected ack frame.
async fn connect_ws(handle: &ServerHandle, query: &str) -> WsStream {
    let url = format!("ws://{}/ws{query}", handle.local_addr());
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["kind"], "connected");
    ws
}

/// Next text frame as JSON, with a timeout so a missing frame fails fast.
async fn next_json(ws: &mut WsStream) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("ws error");
    match frame {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 1. Server starts and binds to a real port
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_starts_and_binds() {
    let handle = start_test_server().await;
    assert_ne!(handle.port(), 0, "OS should assign a non-zero port");
    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 2. Health endpoint responds with 200 + expected JSON fields
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_endpoint_responds() {
    let handle = start_test_server().await;
    let url = format!("{}/health", handle.base_url());

    let resp = reqwest::get(&url).await.expect("GET /health failed");
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body.get("version").is_some());

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 3. Non-existent route returns 404
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nonexistent_route_returns_404() {
    let handle = start_test_server().await;
    let resp = reqwest::get(format!("{}/does-not-exist", handle.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 4. Anonymous WebSocket upgrade responds with 101
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_anonymous_ws_upgrade_responds_101() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let handle = start_test_server().await;
    let addr = handle.local_addr();

    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("TCP connect failed");

    let request = format!(
        "GET /ws HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(
        response.contains("101"),
        "Expected 101 Switching Protocols, got: {response}"
    );

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 5. A handshake with an invalid token is refused before the upgrade
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_token_handshake_is_refused() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let handle = start_test_server().await;
    let addr = handle.local_addr();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /ws?token=not-a-jwt HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(
        response.contains("401"),
        "Expected 401 Unauthorized, got: {response}"
    );
    // a refused handshake never reaches the registry
    assert!(handle.state().registry.is_empty());

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 5b. An empty token parameter is an anonymous connection, not a rejection
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_token_connects_anonymously() {
    let handle = start_test_server().await;

    let _ws = connect_ws(&handle, "?token=").await;
    assert_eq!(handle.state().registry.len(), 1);

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 5c. Evicting a silent peer closes its transport, not just its registry entry
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_eviction_closes_the_transport_of_a_silent_peer() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let handle = start_test_server().await;
    let addr = handle.local_addr();

    // a half-open peer: completes the handshake, then goes silent forever
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /ws?deviceId=ghost HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).contains("101"));

    for _ in 0..50 {
        if handle.state().registry.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(handle.state().registry.len(), 1);

    // two silent sweeps evict the entry
    let window = mirador::now_ms() + 1;
    assert!(handle.state().registry.sweep(window).is_empty());
    assert_eq!(handle.state().registry.sweep(window).len(), 1);
    assert!(handle.state().registry.is_empty());

    // the peer never answers the close frame; the server must still drop
    // the socket, observed here as EOF (or reset) on the raw stream
    let eof = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(eof.is_ok(), "server never closed the evicted connection's transport");

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 6. A device connection registers, and disconnecting cleans it up
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_device_connection_registers_and_cleans_up() {
    let handle = start_test_server().await;

    let mut ws = connect_ws(&handle, "?deviceId=tv-lobby").await;
    assert_eq!(handle.state().registry.len(), 1);

    ws.close(None).await.unwrap();
    // the server-side task cleans up after observing the close
    for _ in 0..50 {
        if handle.state().registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(handle.state().registry.is_empty());

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 7. A status update fans out to the device and entitled operators only
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_update_fans_out_to_entitled_connections() {
    let handle = start_test_server().await;
    let base = handle.base_url();
    let client = reqwest::Client::new();

    let (_, admin_token) = register_and_login(&client, &base, "admin@example.com", "admin").await;
    let (op_id, op_token) = register_and_login(&client, &base, "op@example.com", "operator").await;
    let (_, other_token) = register_and_login(&client, &base, "other@example.com", "operator").await;

    // grant the operator TVs; the other operator keeps the empty default
    let resp = client
        .put(format!("{base}/users/{op_id}/permissions"))
        .bearer_auth(&admin_token)
        .json(&json!({ "totems": false, "tvs": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // admin creates a TV owned by the operator
    let resp = client
        .post(format!("{base}/devices"))
        .bearer_auth(&admin_token)
        .json(&json!({ "name": "lobby tv", "kind": "tv", "ownerId": op_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let device: Value = resp.json().await.unwrap();
    let device_id = device["id"].as_str().unwrap().to_string();

    let mut device_ws = connect_ws(&handle, &format!("?deviceId={device_id}")).await;
    let mut owner_ws = connect_ws(&handle, &format!("?token={op_token}")).await;
    let mut other_ws = connect_ws(&handle, &format!("?token={other_token}")).await;

    let resp = client
        .put(format!("{base}/devices/{device_id}/status"))
        .bearer_auth(&admin_token)
        .json(&json!({ "status": "offline" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    for ws in [&mut device_ws, &mut owner_ws] {
        let event = next_json(ws).await;
        assert_eq!(event["kind"], "status");
        assert_eq!(event["deviceId"], device_id);
        assert_eq!(event["status"], "offline");
        assert!(event["ts"].as_u64().is_some());
    }

    // the unentitled operator sees nothing
    let silent = tokio::time::timeout(Duration::from_millis(300), other_ws.next()).await;
    assert!(silent.is_err(), "unentitled operator received a frame");

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 8. Reconnecting with the same device id supersedes the old connection
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnect_supersedes_old_connection() {
    let handle = start_test_server().await;

    let mut first = connect_ws(&handle, "?deviceId=tv-1").await;
    let _second = connect_ws(&handle, "?deviceId=tv-1").await;
    assert_eq!(handle.state().registry.len(), 1);

    // the old socket is closed by the server
    let frame = tokio::time::timeout(Duration::from_secs(2), first.next())
        .await
        .expect("timed out waiting for close")
        .expect("stream ended")
        .unwrap();
    assert!(matches!(frame, Message::Close(_)), "got {frame:?}");

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 9. Graceful shutdown announces itself to connected clients
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_graceful_shutdown_announces_and_completes() {
    let handle = start_test_server().await;
    let mut ws = connect_ws(&handle, "").await;

    let shutdown = tokio::time::timeout(Duration::from_secs(10), handle.shutdown());
    let (frame, shutdown_result) = tokio::join!(next_json(&mut ws), shutdown);
    assert_eq!(frame["kind"], "shutdown");
    assert!(shutdown_result.is_ok(), "shutdown did not finish in time");
}
