//! Kafka stream source
//!
//! Each partition gets its own `StreamConsumer`, manually assigned at the
//! newest offset. No consumer-group rebalancing and no offset commits: a
//! restarted engine resumes from whatever is produced after it attaches.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::{debug, info};

use super::{PartitionSource, StreamBroker, StreamMessage};
use crate::config::AggregatorConfig;
use crate::error::{StartupError, StreamError};

/// Broker handle for one topic on a Kafka cluster.
#[derive(Debug, Clone)]
pub struct KafkaBroker {
    brokers: String,
    topic: String,
    group_id: String,
    metadata_timeout: Duration,
}

impl KafkaBroker {
    pub fn new(config: &AggregatorConfig) -> Self {
        Self {
            brokers: config.brokers.join(","),
            topic: config.topic.clone(),
            group_id: config.group_id.clone(),
            metadata_timeout: config.metadata_timeout,
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "latest")
            .set("enable.partition.eof", "false");
        config
    }
}

#[async_trait]
impl StreamBroker for KafkaBroker {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn partitions(&self) -> Result<Vec<i32>, StartupError> {
        let consumer: BaseConsumer = self
            .client_config()
            .create()
            .map_err(|e| StartupError::BrokerUnavailable(e.to_string()))?;
        let topic = self.topic.clone();
        let timeout = self.metadata_timeout;

        // Metadata fetches block on the librdkafka client.
        let metadata = tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(Some(topic.as_str()), timeout)
                .map(|metadata| {
                    metadata
                        .topics()
                        .iter()
                        .filter(|t| t.name() == topic)
                        .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                        .collect::<Vec<i32>>()
                })
        })
        .await
        .map_err(|e| StartupError::PartitionDiscovery {
            topic: self.topic.clone(),
            message: e.to_string(),
        })?
        .map_err(|e| StartupError::PartitionDiscovery {
            topic: self.topic.clone(),
            message: e.to_string(),
        })?;

        let mut partitions = metadata;
        partitions.sort_unstable();
        info!(topic = %self.topic, partitions = ?partitions, "Discovered partitions");
        Ok(partitions)
    }

    async fn open_partition(
        &self,
        partition: i32,
    ) -> Result<Box<dyn PartitionSource>, StartupError> {
        let unavailable = |e: rdkafka::error::KafkaError| StartupError::PartitionUnavailable {
            partition,
            message: e.to_string(),
        };

        let consumer: StreamConsumer = self.client_config().create().map_err(unavailable)?;
        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(&self.topic, partition, Offset::End)
            .map_err(unavailable)?;
        consumer.assign(&assignment).map_err(unavailable)?;

        debug!(topic = %self.topic, partition, "Assigned partition at newest offset");
        Ok(Box::new(KafkaPartition {
            partition,
            consumer,
        }))
    }
}

struct KafkaPartition {
    partition: i32,
    consumer: StreamConsumer,
}

#[async_trait]
impl PartitionSource for KafkaPartition {
    fn partition(&self) -> i32 {
        self.partition
    }

    async fn next_message(&mut self) -> Option<Result<StreamMessage, StreamError>> {
        let delivery = match self.consumer.recv().await {
            Ok(message) => Ok(StreamMessage {
                partition: message.partition(),
                offset: message.offset(),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            }),
            Err(e) => Err(StreamError::Receive {
                partition: self.partition,
                message: e.to_string(),
            }),
        };
        Some(delivery)
    }
}
