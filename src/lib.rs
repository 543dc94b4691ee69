//! mirador gateway library
//!
//! Management backend for networked display devices ("totems" and TVs).
//! The control plane is plain request/response HTTP; the interesting part is
//! the real-time synchronization subsystem: a registry of long-lived
//! WebSocket connections (operator dashboards, the displays themselves, and
//! anonymous viewers), a heartbeat sweep that evicts silently-dead
//! connections, and a best-effort event broadcaster that fans status changes
//! out to the connections allowed to see them.

pub mod auth;
pub mod cli;
pub mod config;
pub mod events;
pub mod logging;
pub mod registry;
pub mod server;
pub mod storage;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
