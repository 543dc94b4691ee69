//! HTTP + WebSocket server.

pub mod http;
pub mod startup;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenVerifier;
use crate::config::GatewayConfig;
use crate::events::Broadcaster;
use crate::registry::ConnectionRegistry;
use crate::storage::{DeviceStore, UserStore};

/// Shared state behind every handler: the stores, the token verifier, and
/// the live connection registry with its broadcaster.
#[derive(Debug)]
pub struct GatewayState {
    pub devices: DeviceStore,
    pub users: UserStore,
    pub verifier: TokenVerifier,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Broadcaster,
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
}

impl GatewayState {
    pub fn new(verifier: TokenVerifier, config: &GatewayConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            devices: DeviceStore::new(),
            users: UserStore::new(),
            verifier,
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            sweep_interval: Duration::from_millis(config.sweep_interval_ms),
        }
    }

    /// State with a fixed secret and short intervals, for tests.
    pub fn for_testing(secret: &str) -> Self {
        let config = GatewayConfig {
            jwt_secret: Some(secret.to_string()),
            ..GatewayConfig::default()
        };
        Self::new(TokenVerifier::new(secret.as_bytes()), &config)
    }
}
