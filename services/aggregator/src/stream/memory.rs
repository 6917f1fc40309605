//! Channel-backed stream for tests and local runs
//!
//! Unlike a real broker, messages sent before a worker attaches are
//! buffered rather than skipped. Dropping the [`MemoryProducer`] closes
//! every partition.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{PartitionSource, StreamBroker, StreamMessage};
use crate::error::{StartupError, StreamError};

type Delivery = Result<StreamMessage, StreamError>;

/// Create an in-memory stream with `partitions` partitions numbered from 0.
pub fn memory_stream(partitions: usize) -> (MemoryBroker, MemoryProducer) {
    let mut senders = Vec::with_capacity(partitions);
    let mut receivers = BTreeMap::new();
    for partition in 0..partitions as i32 {
        let (tx, rx) = mpsc::unbounded_channel();
        senders.push(tx);
        receivers.insert(partition, rx);
    }

    let broker = MemoryBroker {
        topic: "memory".to_string(),
        receivers: Mutex::new(receivers),
        partition_count: partitions,
    };
    let producer = MemoryProducer {
        offsets: vec![0; partitions],
        senders,
    };
    (broker, producer)
}

/// Broker side of an in-memory stream. Each partition can be opened once.
pub struct MemoryBroker {
    topic: String,
    receivers: Mutex<BTreeMap<i32, mpsc::UnboundedReceiver<Delivery>>>,
    partition_count: usize,
}

#[async_trait]
impl StreamBroker for MemoryBroker {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn partitions(&self) -> Result<Vec<i32>, StartupError> {
        Ok((0..self.partition_count as i32).collect())
    }

    async fn open_partition(
        &self,
        partition: i32,
    ) -> Result<Box<dyn PartitionSource>, StartupError> {
        let receiver = self
            .receivers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&partition)
            .ok_or_else(|| StartupError::PartitionUnavailable {
                partition,
                message: "unknown or already attached".to_string(),
            })?;

        Ok(Box::new(MemoryPartition {
            partition,
            receiver,
        }))
    }
}

struct MemoryPartition {
    partition: i32,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl PartitionSource for MemoryPartition {
    fn partition(&self) -> i32 {
        self.partition
    }

    async fn next_message(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

/// Producer side of an in-memory stream.
pub struct MemoryProducer {
    senders: Vec<mpsc::UnboundedSender<Delivery>>,
    offsets: Vec<i64>,
}

impl MemoryProducer {
    /// Append a payload to `partition`. Returns the assigned offset, or
    /// None if the partition does not exist or its consumer is gone.
    pub fn send(&mut self, partition: i32, payload: impl Into<Vec<u8>>) -> Option<i64> {
        let index = usize::try_from(partition).ok()?;
        let sender = self.senders.get(index)?;
        let offset = self.offsets[index];

        sender
            .send(Ok(StreamMessage {
                partition,
                offset,
                payload: payload.into(),
            }))
            .ok()?;
        self.offsets[index] += 1;
        Some(offset)
    }

    /// Deliver a receive error on `partition`.
    pub fn send_error(&self, partition: i32, message: impl Into<String>) -> bool {
        let Some(sender) = usize::try_from(partition)
            .ok()
            .and_then(|index| self.senders.get(index))
        else {
            return false;
        };
        sender
            .send(Err(StreamError::Receive {
                partition,
                message: message.into(),
            }))
            .is_ok()
    }
}
