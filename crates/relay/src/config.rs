//! Relay configuration from environment variables.

use crate::error::{RelayError, Result};
use message_store::{StoreConfig, DEFAULT_MAX_MESSAGES_PER_CHANNEL};
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// HTTP/WebSocket listen port (`PORT`).
    pub port: u16,
    /// Prometheus exporter port (`METRICS_PORT`). Disabled when unset.
    pub metrics_port: Option<u16>,
    /// Channel log bound (`MAX_MESSAGES_PER_CHANNEL`).
    pub max_messages_per_channel: usize,
    /// WebSocket keepalive ping interval (`PING_INTERVAL_SECS`).
    pub ping_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            metrics_port: None,
            max_messages_per_channel: DEFAULT_MAX_MESSAGES_PER_CHANNEL,
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through a lookup function. Unset or empty
    /// variables fall back to defaults; unparsable values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let ping_secs = parse_var(&lookup, "PING_INTERVAL_SECS")?
            .unwrap_or(defaults.ping_interval.as_secs());
        if ping_secs == 0 {
            return Err(RelayError::Config(
                "PING_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            port: parse_var(&lookup, "PORT")?.unwrap_or(defaults.port),
            metrics_port: parse_var(&lookup, "METRICS_PORT")?,
            max_messages_per_channel: parse_var(&lookup, "MAX_MESSAGES_PER_CHANNEL")?
                .unwrap_or(defaults.max_messages_per_channel),
            ping_interval: Duration::from_secs(ping_secs),
        })
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_messages_per_channel: self.max_messages_per_channel,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RelayError::Config(format!("{} must be a number, got '{}'", key, raw))),
        _ => Ok(None),
    }
}
