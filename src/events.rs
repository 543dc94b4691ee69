//! Status-change events and their fan-out.
//!
//! Events are ephemeral: constructed after a successful control-plane write,
//! pushed to whoever is connected right now, and discarded. There is no
//! queue and no retry — real-time delivery is a best-effort layer on top of
//! the already-durable mutation, so a delivery failure is logged and
//! skipped, never propagated back to the publisher.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::auth::permissions::{authorize, Action};
use crate::now_ms;
use crate::registry::{ClientKey, ConnectionRegistry};
use crate::storage::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Status,
    Content,
    Update,
}

/// A status-change notification for one device.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub kind: EventKind,
    pub device_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub ts: u64,
}

impl StatusEvent {
    pub fn new(kind: EventKind, device_id: &str, fields: Map<String, Value>) -> Self {
        Self {
            kind,
            device_id: device_id.to_string(),
            fields,
            ts: now_ms(),
        }
    }

    pub fn status(device_id: &str, status: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("status".to_string(), Value::String(status.to_string()));
        Self::new(EventKind::Status, device_id, fields)
    }
}

/// Fans events out to the connections entitled to see them.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `event` to the target device's own connection (if it has one)
    /// and to every operator connection authorized to view the device.
    /// Fire-and-forget: zero reachable targets is a normal outcome.
    pub fn publish(&self, event: &StatusEvent, device: &Device) {
        let serialized = match serde_json::to_string(event) {
            Ok(s) => s,
            Err(err) => {
                debug!(target: "ws", %err, "failed to serialize event, dropping");
                return;
            }
        };

        let device_key = ClientKey::Device(event.device_id.clone());
        let device_reached = self.registry.send_to(&device_key, &serialized);

        let kind = device.kind;
        let owner = device.owner_id.as_str();
        let operators = self.registry.fan_out_operators(&serialized, |identity| {
            authorize(identity, Action::View(kind), Some(owner)).is_ok()
        });

        debug!(
            target: "ws",
            device_id = %event.device_id,
            event = ?event.kind,
            device_reached,
            operators,
            "published status event"
        );
    }

    /// Deliver a server-level announcement to every connection, anonymous
    /// viewers included.
    pub fn announce(&self, kind: &str, payload: Value) {
        let frame = serde_json::json!({ "kind": kind, "payload": payload, "ts": now_ms() });
        self.registry.broadcast_all(&frame.to_string());
    }
}
