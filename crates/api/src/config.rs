//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::ServiceEndpoints;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `DATABASE_URL` — Postgres connection string; unset means the saga log
///   is kept in memory and lost on restart
/// - `CONTENT_SERVICE_URL`, `AFFILIATE_SERVICE_URL`,
///   `COLLABORATION_SERVICE_URL`, `MONITORING_SERVICE_URL` — remote service
///   base urls (defaults match local development ports)
/// - `GATEWAY_TIMEOUT_SECS` — per-request timeout for saga step calls
///   (default: `30`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub endpoints: ServiceEndpoints,
    pub gateway_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = ServiceEndpoints::default();
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            database_url: std::env::var("DATABASE_URL").ok(),
            endpoints: ServiceEndpoints {
                content_url: std::env::var("CONTENT_SERVICE_URL")
                    .unwrap_or(defaults.content_url),
                affiliate_url: std::env::var("AFFILIATE_SERVICE_URL")
                    .unwrap_or(defaults.affiliate_url),
                collaboration_url: std::env::var("COLLABORATION_SERVICE_URL")
                    .unwrap_or(defaults.collaboration_url),
                monitoring_url: std::env::var("MONITORING_SERVICE_URL")
                    .unwrap_or(defaults.monitoring_url),
            },
            gateway_timeout: Duration::from_secs(
                std::env::var("GATEWAY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(30),
            ),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            endpoints: ServiceEndpoints::default(),
            gateway_timeout: Duration::from_secs(30),
            log_level: "info".to_string(),
        }
    }
}
