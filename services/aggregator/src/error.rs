//! Error taxonomy for the aggregation service
//!
//! - `DecodeError` (re-exported from `types`): skip the payload, keep going.
//! - `StoreOperationError`: one store call failed; logged, never retried.
//! - `StreamError`: the broker failed to deliver on a partition; logged.
//! - `StartupError`: the engine cannot start; fatal to the process.

use thiserror::Error;

use crate::config::ConfigError;

pub use types::errors::DecodeError;

/// Failure of a single aggregate-store call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreOperationError {
    #[error("{command} on {key} failed, store unavailable: {message}")]
    Unavailable {
        command: &'static str,
        key: String,
        message: String,
    },

    #[error("{command} on {key} rejected by store: {message}")]
    Rejected {
        command: &'static str,
        key: String,
        message: String,
    },
}

impl StoreOperationError {
    /// Store command that failed.
    pub fn command(&self) -> &'static str {
        match self {
            StoreOperationError::Unavailable { command, .. }
            | StoreOperationError::Rejected { command, .. } => command,
        }
    }

    /// Key the failed command targeted.
    pub fn key(&self) -> &str {
        match self {
            StoreOperationError::Unavailable { key, .. }
            | StoreOperationError::Rejected { key, .. } => key,
        }
    }
}

/// Failure to receive from a stream partition
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("receive failed on partition {partition}: {message}")]
    Receive { partition: i32, message: String },
}

/// Fatal errors raised before any worker starts
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot connect to stream broker: {0}")]
    BrokerUnavailable(String),

    #[error("cannot enumerate partitions of {topic}: {message}")]
    PartitionDiscovery { topic: String, message: String },

    #[error("topic {topic} has no partitions")]
    NoPartitions { topic: String },

    #[error("cannot attach to partition {partition}: {message}")]
    PartitionUnavailable { partition: i32, message: String },

    #[error("cannot connect to aggregate store: {0}")]
    StoreUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_accessors() {
        let err = StoreOperationError::Rejected {
            command: "INCR",
            key: "reportes:total:ropa".to_string(),
            message: "WRONGTYPE".to_string(),
        };
        assert_eq!(err.command(), "INCR");
        assert_eq!(err.key(), "reportes:total:ropa");
        assert!(err.to_string().contains("WRONGTYPE"));
    }

    #[test]
    fn test_startup_error_from_config() {
        let err: StartupError = ConfigError::Missing("KAFKA_BROKERS").into();
        assert!(matches!(err, StartupError::Config(_)));
        assert!(err.to_string().contains("KAFKA_BROKERS"));
    }
}
