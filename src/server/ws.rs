//! WebSocket endpoint.
//!
//! Clients connect to `GET /ws` and identify themselves through query
//! parameters: `?token=` for an authenticated operator, `?deviceId=` for a
//! physical display, neither for an anonymous viewer. Identity is resolved
//! before the upgrade, so a rejected handshake never touches the registry —
//! an invalid or expired token is refused with 401 at the HTTP layer.
//!
//! Each accepted socket gets an unbounded outbound channel drained by a
//! single forward task, which serializes all writes to the transport and
//! preserves per-connection delivery order. The read loop treats any inbound
//! frame as proof of life.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::now_ms;
use crate::registry::{ClientKey, ConnectionHandle};
use crate::server::GatewayState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, alias = "deviceId")]
    device_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let (key, identity) = match resolve_client(&state, &query) {
        Ok(resolved) => resolved,
        Err(response) => return response,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, key, identity))
}

/// Decide who the handshake belongs to, before upgrading.
fn resolve_client(
    state: &GatewayState,
    query: &WsQuery,
) -> Result<(ClientKey, Option<Identity>), Response> {
    // an empty token parameter is absence of a token, not an invalid one
    if let Some(token) = query.token.as_deref().filter(|t| !t.is_empty()) {
        let claims = state.verifier.verify(token).map_err(|err| {
            warn!(target: "ws", %err, "rejecting handshake with invalid token");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "token invalid or expired" })),
            )
                .into_response()
        })?;
        let identity: Identity = claims.into();
        return Ok((ClientKey::Operator(identity.subject.clone()), Some(identity)));
    }

    if let Some(device_id) = query.device_id.as_deref() {
        if device_id.trim().is_empty() {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "deviceId must not be empty" })),
            )
                .into_response());
        }
        return Ok((ClientKey::Device(device_id.to_string()), None));
    }

    Ok((ClientKey::Anonymous(Uuid::new_v4().to_string()), None))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<GatewayState>,
    key: ClientKey,
    identity: Option<Identity>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let handle = ConnectionHandle::new(tx, identity);
    let conn_id = handle.conn_id().to_string();
    state.registry.register(key.clone(), handle.clone());
    info!(target: "ws", ?key, conn_id = %conn_id, "connection established");

    // single writer: everything outbound goes through this task, so
    // registry pushes and heartbeat pings never interleave mid-frame
    let mut forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let ack = json!({ "kind": "connected", "connId": conn_id, "ts": now_ms() });
    handle.send(Message::Text(ack.to_string().into()));

    let ping_handle = handle.clone();
    let ping_interval = state.heartbeat_interval;
    let ping_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !ping_handle.send(Message::Ping(Bytes::new())) {
                break;
            }
        }
    });

    // the forward task exits right after writing a close frame (eviction,
    // supersession) or when a write fails; a silently-dead peer never
    // answers the close, so its exit must also cancel the read and let
    // this task drop the socket
    let mut forward_finished = false;
    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // any inbound frame counts as a heartbeat
                Some(Ok(_)) => handle.touch(),
            },
            _ = &mut forward_task => {
                forward_finished = true;
                break;
            }
        }
    }

    ping_task.abort();
    state.registry.remove(&key, &conn_id);
    let age_ms = now_ms().saturating_sub(handle.established_at_ms());
    debug!(target: "ws", ?key, conn_id = %conn_id, age_ms, "connection closed");
    drop(handle);
    if !forward_finished {
        let _ = forward_task.await;
    }
}
