//! Partition worker
//!
//! One worker owns one partition source and applies its events strictly in
//! arrival order:
//!
//! ```text
//! Idle → Consuming → (Decoding → Resolving → Aggregating)* → Draining → Stopped
//! ```
//!
//! Waiting for the next message is the only point where shutdown is
//! observed, so an event that has been pulled is always fully aggregated
//! before the worker stops. Nothing a single event does can stop the
//! worker: undecodable payloads are skipped, failed store operations are
//! logged, and receive errors are followed by a short back-off.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use types::sale::SaleEvent;

use crate::aggregation::Aggregator;
use crate::metrics::ServiceMetrics;
use crate::stream::{PartitionSource, StreamMessage};

/// Lifecycle state of a partition worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Created, not yet pulling.
    Idle,
    /// Waiting for the next message.
    Consuming,
    Decoding,
    Resolving,
    Aggregating,
    /// Stop requested or input ended; no new message will be pulled.
    Draining,
    /// Terminal. Workers are never restarted.
    Stopped,
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested.
    Shutdown,
    /// The partition source will never yield again.
    StreamEnded,
}

/// Per-partition totals returned when a worker stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub partition: i32,
    pub messages: u64,
    pub aggregated: u64,
    pub decode_failures: u64,
    pub store_failures: u64,
    pub stream_errors: u64,
    pub stop_reason: StopReason,
}

/// Keeps the running-worker gauge raised while a worker future is alive,
/// including when it panics or is aborted.
struct RunningGuard(Arc<ServiceMetrics>);

impl RunningGuard {
    fn enter(metrics: &Arc<ServiceMetrics>) -> Self {
        metrics.worker_started();
        Self(Arc::clone(metrics))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.worker_stopped();
    }
}

struct Tally {
    messages: u64,
    aggregated: u64,
    decode_failures: u64,
    store_failures: u64,
    stream_errors: u64,
}

/// Consumes one partition and feeds every event to the aggregator.
pub struct PartitionWorker {
    source: Box<dyn PartitionSource>,
    aggregator: Arc<Aggregator>,
    metrics: Arc<ServiceMetrics>,
    receive_error_backoff: Duration,
    state: watch::Sender<WorkerState>,
}

impl PartitionWorker {
    pub fn new(
        source: Box<dyn PartitionSource>,
        aggregator: Arc<Aggregator>,
        metrics: Arc<ServiceMetrics>,
        receive_error_backoff: Duration,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            source,
            aggregator,
            metrics,
            receive_error_backoff,
            state,
        }
    }

    pub fn partition(&self) -> i32 {
        self.source.partition()
    }

    /// Observe state transitions. The last published state stays readable
    /// after the worker is gone.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Consume until `cancel` fires or the source ends.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerReport {
        let partition = self.partition();
        let mut tally = Tally {
            messages: 0,
            aggregated: 0,
            decode_failures: 0,
            store_failures: 0,
            stream_errors: 0,
        };

        let running = RunningGuard::enter(&self.metrics);
        info!(partition, "Partition worker consuming");

        let stop_reason = loop {
            self.set_state(WorkerState::Consuming);

            let delivery = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Shutdown,
                delivery = self.source.next_message() => delivery,
            };

            match delivery {
                None => break StopReason::StreamEnded,
                Some(Ok(message)) => self.process(message, &mut tally).await,
                Some(Err(e)) => {
                    tally.stream_errors += 1;
                    self.metrics.record_stream_error();
                    warn!(partition, error = %e, "Stream receive failed");

                    if !self.back_off(&cancel).await {
                        break StopReason::Shutdown;
                    }
                }
            }
        };

        self.set_state(WorkerState::Draining);
        drop(running);
        info!(
            partition,
            reason = ?stop_reason,
            messages = tally.messages,
            aggregated = tally.aggregated,
            decode_failures = tally.decode_failures,
            store_failures = tally.store_failures,
            "Partition worker stopped"
        );
        self.set_state(WorkerState::Stopped);

        WorkerReport {
            partition,
            messages: tally.messages,
            aggregated: tally.aggregated,
            decode_failures: tally.decode_failures,
            store_failures: tally.store_failures,
            stream_errors: tally.stream_errors,
            stop_reason,
        }
    }

    async fn process(&self, message: StreamMessage, tally: &mut Tally) {
        let (partition, offset) = (message.partition, message.offset);
        tally.messages += 1;
        self.metrics.record_message();

        self.set_state(WorkerState::Decoding);
        let sale = match SaleEvent::decode(&message.payload) {
            Ok(sale) => sale,
            Err(e) => {
                tally.decode_failures += 1;
                self.metrics.record_decode_failure();
                warn!(
                    partition,
                    offset,
                    kind = e.kind(),
                    error = %e,
                    "Skipping undecodable payload"
                );
                return;
            }
        };

        self.set_state(WorkerState::Resolving);
        let label = sale.label();

        self.set_state(WorkerState::Aggregating);
        let started = Instant::now();
        let report = self.aggregator.apply(&sale, label).await;
        let elapsed_ns = started.elapsed().as_nanos() as u64;

        for failure in &report.failures {
            warn!(
                partition,
                offset,
                product_id = %sale.product_id(),
                category = label.as_str(),
                command = failure.command(),
                key = failure.key(),
                error = %failure,
                "Store operation failed"
            );
        }

        let failed = report.failures.len() as u64;
        tally.aggregated += 1;
        tally.store_failures += failed;
        self.metrics.record_aggregated(elapsed_ns, failed);

        debug!(
            partition,
            offset,
            product_id = %sale.product_id(),
            category = label.as_str(),
            operations = report.operations,
            failed,
            "Sale aggregated"
        );
    }

    /// Pause after a receive error. Returns false if shutdown came first.
    async fn back_off(&self, cancel: &CancellationToken) -> bool {
        if self.receive_error_backoff.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.receive_error_backoff) => true,
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }
}
