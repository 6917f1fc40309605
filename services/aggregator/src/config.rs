//! Service configuration
//!
//! Everything deployment-specific comes from the environment at startup;
//! the engine itself never reads the environment.

use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineConfig;
use crate::keys::DEFAULT_PRICE_HISTORY_LEN;

pub const DEFAULT_TOPIC: &str = "ventas-blackfriday";
pub const DEFAULT_STORE_ADDR: &str = "valkey.backend.svc.cluster.local:6379";
pub const DEFAULT_GROUP_ID: &str = "ventas-aggregator";

/// Invalid or missing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Startup configuration for the aggregation service.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Stream broker bootstrap addresses.
    pub brokers: Vec<String>,
    /// Stream identifier.
    pub topic: String,
    /// Aggregate store address, `host:port` or URL.
    pub store_addr: String,
    /// Client group id. No offsets are committed under it.
    pub group_id: String,
    /// Samples kept per electronics product.
    pub price_history_len: usize,
    /// Timeout for partition enumeration.
    pub metadata_timeout: Duration,
    /// Pause after a stream receive error before pulling again.
    pub receive_error_backoff: Duration,
    /// Time allowed for workers to finish in-flight events on shutdown.
    pub shutdown_grace: Duration,
    /// Period of the counter log line; None disables it.
    pub metrics_log_interval: Option<Duration>,
}

impl AggregatorConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let brokers: Vec<String> = get("KAFKA_BROKERS")
            .ok_or(ConfigError::Missing("KAFKA_BROKERS"))?
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();
        if brokers.is_empty() {
            return Err(ConfigError::Invalid {
                var: "KAFKA_BROKERS",
                reason: "no broker addresses".to_string(),
            });
        }

        let price_history_len = parse_or(
            "PRICE_HISTORY_LEN",
            get("PRICE_HISTORY_LEN"),
            DEFAULT_PRICE_HISTORY_LEN as u64,
        )? as usize;
        if price_history_len == 0 {
            return Err(ConfigError::Invalid {
                var: "PRICE_HISTORY_LEN",
                reason: "must be at least 1".to_string(),
            });
        }

        let metrics_secs = parse_or(
            "METRICS_LOG_INTERVAL_SECS",
            get("METRICS_LOG_INTERVAL_SECS"),
            30,
        )?;

        Ok(Self {
            brokers,
            topic: get("SALES_TOPIC").unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            store_addr: get("VALKEY_ADDR").unwrap_or_else(|| DEFAULT_STORE_ADDR.to_string()),
            group_id: get("KAFKA_GROUP_ID").unwrap_or_else(|| DEFAULT_GROUP_ID.to_string()),
            price_history_len,
            metadata_timeout: Duration::from_millis(parse_or(
                "METADATA_TIMEOUT_MS",
                get("METADATA_TIMEOUT_MS"),
                5_000,
            )?),
            receive_error_backoff: Duration::from_millis(parse_or(
                "RECEIVE_ERROR_BACKOFF_MS",
                get("RECEIVE_ERROR_BACKOFF_MS"),
                500,
            )?),
            shutdown_grace: Duration::from_millis(parse_or(
                "SHUTDOWN_GRACE_MS",
                get("SHUTDOWN_GRACE_MS"),
                10_000,
            )?),
            metrics_log_interval: (metrics_secs > 0).then(|| Duration::from_secs(metrics_secs)),
        })
    }

    /// Engine tuning derived from this configuration.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            price_history_len: self.price_history_len,
            receive_error_backoff: self.receive_error_backoff,
            shutdown_grace: self.shutdown_grace,
        }
    }
}

fn parse_or(var: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
            var,
            reason: format!("{raw:?}: {e}"),
        }),
    }
}
