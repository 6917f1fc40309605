//! Partitioned event stream
//!
//! The broker hands out one [`PartitionSource`] per partition; each source
//! yields raw payloads in arrival order. Offset management belongs to the
//! broker side: sources start at the newest offset and never checkpoint.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use async_trait::async_trait;

use crate::error::{StartupError, StreamError};

#[cfg(feature = "kafka")]
pub use self::kafka::KafkaBroker;
pub use self::memory::{memory_stream, MemoryBroker, MemoryProducer};

/// One raw message pulled from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Ordered message source for a single partition.
#[async_trait]
pub trait PartitionSource: Send + Sync {
    fn partition(&self) -> i32;

    /// Wait for the next message.
    ///
    /// `None` means the partition will never yield again. Must be
    /// cancel-safe: dropping the future must not lose a delivered message.
    async fn next_message(&mut self) -> Option<Result<StreamMessage, StreamError>>;
}

/// Partition discovery and attachment.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Stream identifier, for logging.
    fn topic(&self) -> &str;

    async fn partitions(&self) -> Result<Vec<i32>, StartupError>;

    async fn open_partition(
        &self,
        partition: i32,
    ) -> Result<Box<dyn PartitionSource>, StartupError>;
}
