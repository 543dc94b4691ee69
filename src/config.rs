//! Gateway configuration.
//!
//! Loaded from an optional JSON config file with environment variable
//! overrides (`MIRADOR_PORT`, `MIRADOR_JWT_SECRET`). A missing token-signing
//! secret is a fatal startup error, never a per-request condition: an
//! unverifiable token must not be mistaken for a valid anonymous connection.

use std::path::Path;

use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no JWT secret configured (set MIRADOR_JWT_SECRET or jwtSecret in the config file)")]
    MissingSecret,
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// HS256 signing secret for operator tokens.
    pub jwt_secret: Option<String>,
    /// Period between server-initiated WebSocket pings, per connection.
    pub heartbeat_interval_ms: u64,
    /// Period between liveness sweeps over the connection registry.
    pub sweep_interval_ms: u64,
    /// "json" or "plaintext" log output.
    pub log_format: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            jwt_secret: None,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            log_format: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration: file (if given and present), then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                serde_json::from_str::<GatewayConfig>(&raw)?
            }
            _ => GatewayConfig::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = std::env::var("MIRADOR_PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "MIRADOR_PORT",
                value: port.clone(),
            })?;
        }
        if let Ok(secret) = std::env::var("MIRADOR_JWT_SECRET") {
            if !secret.is_empty() {
                self.jwt_secret = Some(secret);
            }
        }
        Ok(())
    }

    /// The signing secret, or the fatal configuration error.
    pub fn require_secret(&self) -> Result<&str, ConfigError> {
        self.jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.sweep_interval_ms, 30_000);
        assert!(config.jwt_secret.is_none());
    }

    #[test]
    fn missing_secret_is_a_config_error() {
        let config = GatewayConfig::default();
        assert!(matches!(
            config.require_secret(),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn empty_secret_counts_as_missing() {
        let config = GatewayConfig {
            jwt_secret: Some(String::new()),
            ..GatewayConfig::default()
        };
        assert!(config.require_secret().is_err());
    }

    #[test]
    fn parses_camel_case_file() {
        let raw = r#"{ "port": 8080, "jwtSecret": "s3cret", "sweepIntervalMs": 5000 }"#;
        let config: GatewayConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.require_secret().unwrap(), "s3cret");
        assert_eq!(config.sweep_interval_ms, 5000);
        // unspecified fields keep defaults
        assert_eq!(config.heartbeat_interval_ms, 30_000);
    }
}
