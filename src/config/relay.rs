//! Relay configuration.

use std::{path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

#[cfg(feature = "transport")]
use crate::transport::SessionOptions;

/// Log output format for [`init_tracing`](crate::init_tracing).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidLogFormat(other.to_string())),
        }
    }
}

/// Configuration validation error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("poll_interval cannot be zero")]
    ZeroPollInterval,

    #[error("outbound_buffer cannot be zero")]
    ZeroOutboundBuffer,

    #[error("keep_alive cannot be zero")]
    ZeroKeepAlive,

    #[error("message_retention cannot be zero")]
    ZeroRetention,

    #[error("route path must start with '/': {0}")]
    InvalidPath(String),

    #[error("sse_path and message_path must differ")]
    PathCollision,

    #[error("unknown log format: {0}")]
    InvalidLogFormat(String),
}

/// Relay configuration.
///
/// Read from environment variables by [`from_env`](Self::from_env):
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `HOST` | `127.0.0.1` | Server bind address |
/// | `PORT` | `3000` | Server port |
/// | `SSE_PATH` | `/sse` | Route of the SSE stream |
/// | `MESSAGE_PATH` | `/messages` | Route of the ingress endpoint |
/// | `POLL_INTERVAL_MS` | `1000` | Wait between queue polls |
/// | `OUTBOUND_BUFFER` | `64` | Frames buffered per stream |
/// | `KEEP_ALIVE_SECS` | (none) | SSE keep-alive comment interval |
/// | `MESSAGE_RETENTION_SECS` | (none) | Purge processed messages older than this |
/// | `DATABASE_PATH` | (none) | SQLite file; in-memory store when unset |
/// | `LOG_FORMAT` | `pretty` | `pretty` or `json` |
///
/// # Example
///
/// ```rust
/// use mcp_relay::RelayConfig;
///
/// let config = RelayConfig::from_env();
/// config.validate().unwrap();
/// println!("listening on {}", config.socket_addr());
/// ```
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub sse_path: String,
    pub message_path: String,
    pub poll_interval: Duration,
    pub outbound_buffer: usize,
    pub keep_alive: Option<Duration>,
    pub message_retention: Option<Duration>,
    pub database_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            sse_path: "/sse".to_string(),
            message_path: "/messages".to_string(),
            poll_interval: Duration::from_secs(1),
            outbound_buffer: 64,
            keep_alive: None,
            message_retention: None,
            database_path: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl RelayConfig {
    /// Create a new config from environment variables.
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|value| value.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            sse_path: lookup("SSE_PATH").unwrap_or(defaults.sse_path),
            message_path: lookup("MESSAGE_PATH").unwrap_or(defaults.message_path),
            poll_interval: parsed("POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            outbound_buffer: parsed("OUTBOUND_BUFFER")
                .map(|n| n as usize)
                .unwrap_or(defaults.outbound_buffer),
            keep_alive: parsed("KEEP_ALIVE_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            message_retention: parsed("MESSAGE_RETENTION_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            database_path: lookup("DATABASE_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.log_format),
        }
    }

    /// Check the values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::ZeroOutboundBuffer);
        }
        if self.keep_alive.is_some_and(|interval| interval.is_zero()) {
            return Err(ConfigError::ZeroKeepAlive);
        }
        if self.message_retention.is_some_and(|window| window.is_zero()) {
            return Err(ConfigError::ZeroRetention);
        }
        for path in [&self.sse_path, &self.message_path] {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidPath(path.clone()));
            }
        }
        if self.sse_path == self.message_path {
            return Err(ConfigError::PathCollision);
        }
        Ok(())
    }

    /// Get the socket address for binding.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[cfg(feature = "transport")]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            message_path: self.message_path.clone(),
            poll_interval: self.poll_interval,
            outbound_buffer: self.outbound_buffer,
        }
    }
}
