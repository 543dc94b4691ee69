//! Periodic liveness sweep.
//!
//! Half-open connections (a display loses power, a proxy drops silently)
//! never produce a transport close event, so liveness is detected by the
//! absence of heartbeats instead. Each sweep marks silent connections
//! suspect and evicts those already suspect, bounding worst-case stale
//! retention to two sweep intervals.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::ConnectionRegistry;
use crate::now_ms;

/// Run sweeps over `registry` every `interval` until shutdown is signalled.
pub fn spawn_sweep_task(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick fires immediately; consume it so the first real
        // sweep happens one full interval after startup
        ticker.tick().await;
        let mut last_sweep_ms = now_ms();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let window_start = last_sweep_ms;
                    last_sweep_ms = now_ms();
                    let evicted = registry.sweep(window_start);
                    if !evicted.is_empty() {
                        debug!(target: "ws", count = evicted.len(), "liveness sweep evicted connections");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
