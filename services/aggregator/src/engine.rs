//! Aggregation engine
//!
//! Discovers the stream's partitions, attaches a source to each, and runs
//! one [`PartitionWorker`] task per partition. Workers share only the
//! aggregator (and through it the store client), the service counters, and
//! the shutdown token.
//!
//! Every partition is attached before the first worker is spawned, so a
//! startup failure never leaves a partial set of workers running.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregation::{Aggregator, Clock, SystemClock};
use crate::error::StartupError;
use crate::keys::DEFAULT_PRICE_HISTORY_LEN;
use crate::metrics::ServiceMetrics;
use crate::store::AggregateStore;
use crate::stream::StreamBroker;
use crate::worker::{PartitionWorker, WorkerReport, WorkerState};

/// Engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub price_history_len: usize,
    pub receive_error_backoff: Duration,
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            price_history_len: DEFAULT_PRICE_HISTORY_LEN,
            receive_error_backoff: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Owns the stream and store clients and starts partition workers.
pub struct AggregationEngine {
    broker: Arc<dyn StreamBroker>,
    store: Arc<dyn AggregateStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    metrics: Arc<ServiceMetrics>,
}

impl AggregationEngine {
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        store: Arc<dyn AggregateStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            broker,
            store,
            clock: Arc::new(SystemClock),
            config,
            metrics: Arc::new(ServiceMetrics::new()),
        }
    }

    /// Replace the clock used for price-history timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> Arc<ServiceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Attach to every partition and spawn one worker each.
    ///
    /// Workers stop when `cancel` fires or their partition ends.
    pub async fn start(&self, cancel: CancellationToken) -> Result<EngineHandle, StartupError> {
        let topic = self.broker.topic().to_string();
        let partitions = self.broker.partitions().await?;
        if partitions.is_empty() {
            return Err(StartupError::NoPartitions { topic });
        }

        let mut sources = Vec::with_capacity(partitions.len());
        for &partition in &partitions {
            sources.push(self.broker.open_partition(partition).await?);
            info!(topic = %topic, partition, "Attached to partition at newest offset");
        }

        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.price_history_len,
        ));

        let workers = sources
            .into_iter()
            .map(|source| {
                let worker = PartitionWorker::new(
                    source,
                    Arc::clone(&aggregator),
                    Arc::clone(&self.metrics),
                    self.config.receive_error_backoff,
                );
                let partition = worker.partition();
                let state = worker.subscribe();
                let task = tokio::spawn(worker.run(cancel.clone()));
                WorkerHandle {
                    partition,
                    state,
                    task,
                }
            })
            .collect::<Vec<_>>();

        info!(
            topic = %topic,
            partitions = workers.len(),
            price_history_len = self.config.price_history_len,
            "Aggregation engine started"
        );

        Ok(EngineHandle {
            workers,
            cancel,
            shutdown_grace: self.config.shutdown_grace,
        })
    }
}

struct WorkerHandle {
    partition: i32,
    state: watch::Receiver<WorkerState>,
    task: JoinHandle<WorkerReport>,
}

/// Control over a running engine.
pub struct EngineHandle {
    workers: Vec<WorkerHandle>,
    cancel: CancellationToken,
    shutdown_grace: Duration,
}

impl EngineHandle {
    pub fn partitions(&self) -> Vec<i32> {
        self.workers.iter().map(|w| w.partition).collect()
    }

    /// Current state of every worker, by partition.
    pub fn worker_states(&self) -> BTreeMap<i32, WorkerState> {
        self.workers
            .iter()
            .map(|w| (w.partition, *w.state.borrow()))
            .collect()
    }

    /// State watch for one partition's worker.
    pub fn watch_worker(&self, partition: i32) -> Option<watch::Receiver<WorkerState>> {
        self.workers
            .iter()
            .find(|w| w.partition == partition)
            .map(|w| w.state.clone())
    }

    /// Ask every worker to stop pulling. Events already pulled finish.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every worker to exit on its own.
    pub async fn join(self) -> EngineSummary {
        let mut summary = EngineSummary::default();
        for worker in self.workers {
            let outcome = worker.task.await;
            summary.settle(worker.partition, outcome);
        }
        summary
    }

    /// Stop every worker and wait up to the shutdown grace period for them
    /// to drain. Workers still running after that are aborted.
    pub async fn shutdown_and_join(self) -> EngineSummary {
        self.shutdown();
        info!(
            workers = self.workers.len(),
            grace_ms = self.shutdown_grace.as_millis() as u64,
            "Draining partition workers"
        );

        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        let mut summary = EngineSummary::default();
        for mut worker in self.workers {
            match tokio::time::timeout_at(deadline, &mut worker.task).await {
                Ok(outcome) => summary.settle(worker.partition, outcome),
                Err(_) => {
                    let state = *worker.state.borrow();
                    warn!(
                        partition = worker.partition,
                        state = ?state,
                        "Worker did not drain in time, aborting"
                    );
                    worker.task.abort();
                    // Resolves once the task's future has been dropped.
                    let _ = worker.task.await;
                    summary.aborted.push(worker.partition);
                }
            }
        }
        summary
    }
}

/// How the workers ended.
#[derive(Debug, Default)]
pub struct EngineSummary {
    /// Reports of workers that stopped normally.
    pub reports: Vec<WorkerReport>,
    /// Partitions whose worker panicked.
    pub panicked: Vec<i32>,
    /// Partitions whose worker was aborted or cancelled by the runtime.
    pub aborted: Vec<i32>,
}

impl EngineSummary {
    fn settle(&mut self, partition: i32, outcome: Result<WorkerReport, JoinError>) {
        match outcome {
            Ok(report) => self.reports.push(report),
            Err(e) if e.is_panic() => {
                error!(partition, error = %e, "Partition worker panicked");
                self.panicked.push(partition);
            }
            Err(e) => {
                warn!(partition, error = %e, "Partition worker cancelled");
                self.aborted.push(partition);
            }
        }
    }

    /// Whether every worker stopped normally.
    pub fn is_clean(&self) -> bool {
        self.panicked.is_empty() && self.aborted.is_empty()
    }

    pub fn events_aggregated(&self) -> u64 {
        self.reports.iter().map(|r| r.aggregated).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::store::{MemoryStore, StoreResult};
    use crate::stream::{memory_stream, PartitionSource, StreamMessage};
    use crate::worker::StopReason;
    use async_trait::async_trait;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            receive_error_backoff: Duration::ZERO,
            shutdown_grace: Duration::from_millis(200),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_one_worker_per_partition() {
        let (broker, producer) = memory_stream(3);
        let engine = AggregationEngine::new(
            Arc::new(broker),
            Arc::new(MemoryStore::new()),
            fast_config(),
        );

        let handle = engine.start(CancellationToken::new()).await.unwrap();
        assert_eq!(handle.partitions(), vec![0, 1, 2]);
        assert_eq!(handle.worker_states().len(), 3);

        drop(producer);
        let summary = handle.join().await;
        assert!(summary.is_clean());
        assert_eq!(summary.reports.len(), 3);
        assert!(summary
            .reports
            .iter()
            .all(|r| r.stop_reason == StopReason::StreamEnded));
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_worker() {
        let (broker, _producer) = memory_stream(2);
        let engine = AggregationEngine::new(
            Arc::new(broker),
            Arc::new(MemoryStore::new()),
            fast_config(),
        );
        let handle = engine.start(CancellationToken::new()).await.unwrap();

        let summary = handle.shutdown_and_join().await;
        assert!(summary.is_clean());
        assert!(summary
            .reports
            .iter()
            .all(|r| r.stop_reason == StopReason::Shutdown));
        assert_eq!(engine.metrics().export()["workers_running"], 0);
    }

    struct EmptyBroker;

    #[async_trait]
    impl StreamBroker for EmptyBroker {
        fn topic(&self) -> &str {
            "ventas-vacias"
        }

        async fn partitions(&self) -> Result<Vec<i32>, StartupError> {
            Ok(Vec::new())
        }

        async fn open_partition(
            &self,
            partition: i32,
        ) -> Result<Box<dyn PartitionSource>, StartupError> {
            Err(StartupError::PartitionUnavailable {
                partition,
                message: "no such partition".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_no_partitions_is_startup_error() {
        let engine = AggregationEngine::new(
            Arc::new(EmptyBroker),
            Arc::new(MemoryStore::new()),
            fast_config(),
        );
        let err = engine.start(CancellationToken::new()).await.err().unwrap();
        assert!(matches!(err, StartupError::NoPartitions { topic } if topic == "ventas-vacias"));
    }

    struct PanickingSource;

    #[async_trait]
    impl PartitionSource for PanickingSource {
        fn partition(&self) -> i32 {
            0
        }

        async fn next_message(&mut self) -> Option<Result<StreamMessage, StreamError>> {
            panic!("source exploded");
        }
    }

    struct PanickingBroker;

    #[async_trait]
    impl StreamBroker for PanickingBroker {
        fn topic(&self) -> &str {
            "ventas-rotas"
        }

        async fn partitions(&self) -> Result<Vec<i32>, StartupError> {
            Ok(vec![0])
        }

        async fn open_partition(
            &self,
            _partition: i32,
        ) -> Result<Box<dyn PartitionSource>, StartupError> {
            Ok(Box::new(PanickingSource))
        }
    }

    #[tokio::test]
    async fn test_worker_panic_is_reported_not_restarted() {
        let engine = AggregationEngine::new(
            Arc::new(PanickingBroker),
            Arc::new(MemoryStore::new()),
            fast_config(),
        );
        let handle = engine.start(CancellationToken::new()).await.unwrap();

        let summary = handle.join().await;
        assert_eq!(summary.panicked, vec![0]);
        assert!(summary.reports.is_empty());
        assert_eq!(engine.metrics().export()["workers_running"], 0);
    }

    /// Store whose every call hangs.
    struct StuckStore;

    #[async_trait]
    impl AggregateStore for StuckStore {
        async fn set_max(&self, _key: &str, _value: f64) -> StoreResult<bool> {
            std::future::pending().await
        }
        async fn set_min(&self, _key: &str, _value: f64) -> StoreResult<bool> {
            std::future::pending().await
        }
        async fn incr(&self, _key: &str, _delta: i64) -> StoreResult<i64> {
            std::future::pending().await
        }
        async fn hincr(&self, _key: &str, _field: &str, _delta: i64) -> StoreResult<i64> {
            std::future::pending().await
        }
        async fn hincr_float(&self, _key: &str, _field: &str, _delta: f64) -> StoreResult<f64> {
            std::future::pending().await
        }
        async fn zincr(&self, _key: &str, _member: &str, _delta: f64) -> StoreResult<f64> {
            std::future::pending().await
        }
        async fn zadd(&self, _key: &str, _member: &str, _score: f64) -> StoreResult<()> {
            std::future::pending().await
        }
        async fn ztrim_to_newest(&self, _key: &str, _keep: usize) -> StoreResult<u64> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stuck_worker_aborted_after_grace() {
        let (broker, mut producer) = memory_stream(1);
        let engine = AggregationEngine::new(Arc::new(broker), Arc::new(StuckStore), fast_config());
        let handle = engine.start(CancellationToken::new()).await.unwrap();
        let mut state = handle.watch_worker(0).unwrap();

        producer.send(0, r#"{"categoria":1,"producto_id":"P7","precio":1,"cantidad_vendida":1}"#);
        state
            .wait_for(|s| *s == WorkerState::Aggregating)
            .await
            .unwrap();

        let summary = handle.shutdown_and_join().await;
        assert_eq!(summary.aborted, vec![0]);
        assert!(!summary.is_clean());
        assert_eq!(engine.metrics().export()["workers_running"], 0);
    }
}
