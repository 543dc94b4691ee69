//! Structured logging via tracing.
//!
//! Supports JSON (production) and plaintext (development) output. The filter
//! comes from `MIRADOR_LOG` or `RUST_LOG`, falling back to the configured
//! default level.

use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON for production (structured logs).
    Json,
    /// Human-readable plaintext for development.
    #[default]
    Plaintext,
}

/// Configuration for the logging subsystem.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Default log level when no env filter is set.
    pub default_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plaintext,
            default_level: Level::INFO,
        }
    }
}

impl LogConfig {
    pub fn development() -> Self {
        Self {
            format: LogFormat::Plaintext,
            default_level: Level::DEBUG,
        }
    }

    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            default_level: Level::INFO,
        }
    }
}

/// Initialize the global tracing subscriber. Safe to call more than once;
/// subsequent calls are no-ops.
pub fn init_logging(config: LogConfig) {
    if INIT_GUARD.set(()).is_err() {
        return;
    }

    let filter = std::env::var("MIRADOR_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new(config.default_level.to_string()));

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Plaintext => tracing_subscriber::fmt::layer().boxed(),
    };

    // try_init so embedding in tests with their own subscriber does not panic
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
