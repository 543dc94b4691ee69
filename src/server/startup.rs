//! Server startup and lifecycle.
//!
//! `run_server_with_config` binds the listener, mounts the HTTP and
//! WebSocket routes and returns a [`ServerHandle`] the caller uses to learn
//! the bound address and to shut the server down. Tests start a full server
//! on an ephemeral port with background tasks disabled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::registry::liveness;
use crate::server::{http, ws, GatewayState};

pub struct ServerConfig {
    pub state: Arc<GatewayState>,
    pub bind_address: SocketAddr,
    /// When false, no liveness sweep runs; tests drive sweeps directly.
    pub spawn_background_tasks: bool,
}

impl ServerConfig {
    pub fn new(state: Arc<GatewayState>, bind_address: SocketAddr) -> Self {
        Self {
            state,
            bind_address,
            spawn_background_tasks: true,
        }
    }

    /// Ephemeral port, no background tasks.
    pub fn for_testing(state: Arc<GatewayState>) -> Self {
        Self {
            state,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            spawn_background_tasks: false,
        }
    }
}

/// A running server. Dropping the handle does not stop the server; call
/// [`ServerHandle::shutdown`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    state: Arc<GatewayState>,
    server_task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Announce the shutdown to connected clients, give the frames a moment
    /// to flush, then stop accepting and wait for the serve task to finish.
    pub async fn shutdown(self) {
        self.state
            .broadcaster
            .announce("shutdown", serde_json::json!({ "reason": "server stopping" }));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(Duration::from_secs(5), self.server_task)
            .await
            .is_err()
        {
            error!(target: "server", "server task did not stop within 5s");
        }
    }
}

pub async fn run_server_with_config(config: ServerConfig) -> std::io::Result<ServerHandle> {
    let ServerConfig {
        state,
        bind_address,
        spawn_background_tasks,
    } = config;

    let app = http::create_router(state.clone()).merge(
        Router::new()
            .route("/ws", get(ws::ws_handler))
            .with_state(state.clone()),
    );

    let listener = TcpListener::bind(bind_address).await?;
    let local_addr = listener.local_addr()?;
    info!(target: "server", %local_addr, "listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if spawn_background_tasks {
        liveness::spawn_sweep_task(
            state.registry.clone(),
            state.sweep_interval,
            shutdown_rx.clone(),
        );
    }

    let mut serve_shutdown_rx = shutdown_rx;
    let server_task = tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            while serve_shutdown_rx.changed().await.is_ok() {
                if *serve_shutdown_rx.borrow() {
                    break;
                }
            }
        });
        if let Err(err) = serve.await {
            error!(target: "server", %err, "server error");
        }
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        state,
        server_task,
    })
}
