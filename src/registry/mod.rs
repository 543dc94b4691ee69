//! The live connection registry.
//!
//! Maps an identity key (operator id, device id, or an anonymous connection
//! id) to at most one live connection. A newer connection for the same key
//! supersedes the old one, which is closed — this bounds memory to one entry
//! per key and prevents duplicate delivery to a stale handle. All operations
//! take the single registry lock; sends are pushes onto a per-connection
//! channel and never block under it.

pub mod liveness;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::Identity;
use crate::now_ms;

/// Close code sent when a newer connection supersedes an old one.
const CLOSE_SUPERSEDED: u16 = 1000;
/// Close code sent when the liveness sweep evicts a silent connection.
const CLOSE_STALE: u16 = 1001;

/// How a live connection is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// Operator dashboard, keyed by the operator's user id.
    Operator(String),
    /// The physical display's own socket, keyed by device id.
    Device(String),
    /// Unidentified viewer; receives broadcast-all traffic only.
    Anonymous(String),
}

/// A registered connection. Cheap to clone: the sender and the heartbeat
/// timestamp are shared with the owning connection task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: String,
    identity: Option<Identity>,
    tx: mpsc::UnboundedSender<Message>,
    established_at_ms: u64,
    last_heartbeat_ms: Arc<AtomicU64>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<Message>, identity: Option<Identity>) -> Self {
        let now = now_ms();
        Self {
            conn_id: Uuid::new_v4().to_string(),
            identity,
            tx,
            established_at_ms: now,
            last_heartbeat_ms: Arc::new(AtomicU64::new(now)),
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn established_at_ms(&self) -> u64 {
        self.established_at_ms
    }

    /// Record a heartbeat. Called only by the owning connection task; the
    /// sweep only reads.
    pub fn touch(&self) {
        self.last_heartbeat_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_heartbeat_ms(&self) -> u64 {
        self.last_heartbeat_ms.load(Ordering::Relaxed)
    }

    /// Non-blocking send; `false` when the receiving task is gone.
    pub fn send(&self, msg: Message) -> bool {
        self.tx.send(msg).is_ok()
    }

    fn close(&self, code: u16, reason: &'static str) {
        let _ = self.tx.send(Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        })));
    }
}

struct Entry {
    handle: ConnectionHandle,
    /// Set by a sweep that saw no heartbeat; a second silent sweep evicts.
    suspect: bool,
}

/// Concurrent map of live connections. Single mutual-exclusion boundary;
/// expected cardinality is hundreds to low thousands.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ClientKey, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection for `key`, closing any previous holder of the key.
    pub fn register(&self, key: ClientKey, handle: ConnectionHandle) {
        let mut connections = self.connections.lock();
        if let Some(old) = connections.insert(
            key.clone(),
            Entry {
                handle,
                suspect: false,
            },
        ) {
            info!(target: "ws", ?key, "superseding existing connection");
            old.handle.close(CLOSE_SUPERSEDED, "superseded by newer connection");
        }
    }

    pub fn lookup(&self, key: &ClientKey) -> Option<ConnectionHandle> {
        self.connections.lock().get(key).map(|e| e.handle.clone())
    }

    /// Remove the entry for `key` if it still belongs to `conn_id`.
    /// Idempotent, and a no-op when a newer connection has taken the key.
    pub fn remove(&self, key: &ClientKey, conn_id: &str) {
        let mut connections = self.connections.lock();
        if connections
            .get(key)
            .is_some_and(|e| e.handle.conn_id == conn_id)
        {
            connections.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Deliver a serialized message to the connection holding `key`, if any.
    /// Returns whether a live target accepted it; a dead sender is pruned.
    pub fn send_to(&self, key: &ClientKey, text: &str) -> bool {
        let mut connections = self.connections.lock();
        let Some(entry) = connections.get(key) else {
            return false;
        };
        if entry.handle.send(Message::Text(text.into())) {
            true
        } else {
            connections.remove(key);
            false
        }
    }

    /// Deliver to every operator connection whose identity passes `allow`.
    /// Unreachable connections are skipped and pruned, never retried.
    pub fn fan_out_operators(&self, text: &str, mut allow: impl FnMut(&Identity) -> bool) -> usize {
        let mut connections = self.connections.lock();
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (key, entry) in connections.iter() {
            let ClientKey::Operator(_) = key else {
                continue;
            };
            let Some(identity) = entry.handle.identity() else {
                continue;
            };
            if !allow(identity) {
                continue;
            }
            if entry.handle.send(Message::Text(text.into())) {
                delivered += 1;
            } else {
                dead.push(key.clone());
            }
        }
        for key in dead {
            debug!(target: "ws", ?key, "pruning dead connection during fan-out");
            connections.remove(&key);
        }
        delivered
    }

    /// Deliver to every registered connection, anonymous viewers included.
    pub fn broadcast_all(&self, text: &str) {
        let mut connections = self.connections.lock();
        let mut dead = Vec::new();
        for (key, entry) in connections.iter() {
            if !entry.handle.send(Message::Text(text.into())) {
                dead.push(key.clone());
            }
        }
        for key in dead {
            connections.remove(&key);
        }
    }

    /// One liveness pass. A connection with no heartbeat since
    /// `window_start_ms` becomes suspect; a connection already suspect is
    /// closed and evicted. Returns the evicted keys.
    pub fn sweep(&self, window_start_ms: u64) -> Vec<ClientKey> {
        let mut connections = self.connections.lock();
        let mut evicted = Vec::new();
        for (key, entry) in connections.iter_mut() {
            if entry.handle.last_heartbeat_ms() >= window_start_ms {
                entry.suspect = false;
            } else if entry.suspect {
                evicted.push(key.clone());
            } else {
                entry.suspect = true;
            }
        }
        for key in &evicted {
            if let Some(entry) = connections.remove(key) {
                info!(target: "ws", ?key, "evicting stale connection");
                entry.handle.close(CLOSE_STALE, "heartbeat timeout");
            }
        }
        evicted
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("len", &self.len())
            .finish()
    }
}
