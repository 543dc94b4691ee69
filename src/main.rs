use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use mirador::auth::TokenVerifier;
use mirador::cli::Cli;
use mirador::config::GatewayConfig;
use mirador::logging::{init_logging, LogConfig};
use mirador::server::startup::{run_server_with_config, ServerConfig};
use mirador::server::GatewayState;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match GatewayConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = cli.port {
        config.port = port;
    }

    let log_config = if cli.json_logs || config.log_format.as_deref() == Some("json") {
        LogConfig::production()
    } else {
        LogConfig::development()
    };
    init_logging(log_config);

    let secret = match config.require_secret() {
        Ok(secret) => secret.to_string(),
        Err(err) => {
            error!(target: "server", %err, "refusing to start");
            return ExitCode::FAILURE;
        }
    };

    let host: IpAddr = match config.host.parse() {
        Ok(host) => host,
        Err(_) => {
            error!(target: "server", host = %config.host, "invalid listen host");
            return ExitCode::FAILURE;
        }
    };
    let bind_address = SocketAddr::new(host, config.port);

    let verifier = TokenVerifier::new(secret.as_bytes());
    let state = Arc::new(GatewayState::new(verifier, &config));

    let handle = match run_server_with_config(ServerConfig::new(state, bind_address)).await {
        Ok(handle) => handle,
        Err(err) => {
            error!(target: "server", %err, "failed to bind");
            return ExitCode::FAILURE;
        }
    };

    info!(target: "server", port = handle.port(), "gateway running");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target: "server", %err, "failed to wait for shutdown signal");
    }
    info!(target: "server", "shutting down");
    handle.shutdown().await;
    ExitCode::SUCCESS
}
