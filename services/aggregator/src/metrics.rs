//! Service counters for the aggregation engine
//!
//! Process-local observability only: counters shared by every partition
//! worker plus a latency window over per-event aggregation time. Exported
//! as a sorted map for periodic log lines.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core counters for the aggregation service.
pub struct ServiceMetrics {
    // Stream intake
    pub messages_received: AtomicU64,
    pub stream_errors: AtomicU64,

    // Event handling
    pub events_aggregated: AtomicU64,
    pub decode_failures: AtomicU64,
    pub store_failures: AtomicU64,
    pub aggregation_ns: Mutex<LatencyTracker>,

    // Workers
    pub workers_running: AtomicU64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            stream_errors: AtomicU64::new(0),
            events_aggregated: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            aggregation_ns: Mutex::new(LatencyTracker::new(1000)),
            workers_running: AtomicU64::new(0),
        }
    }

    /// Record a message pulled from a partition.
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a broker receive error.
    pub fn record_stream_error(&self) {
        self.stream_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a payload skipped as undecodable.
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event whose store operations were all issued.
    pub fn record_aggregated(&self, latency_ns: u64, failed_operations: u64) {
        self.events_aggregated.fetch_add(1, Ordering::Relaxed);
        if failed_operations > 0 {
            self.store_failures
                .fetch_add(failed_operations, Ordering::Relaxed);
        }
        if let Ok(mut tracker) = self.aggregation_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    pub fn worker_started(&self) {
        self.workers_running.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stopped(&self) {
        self.workers_running.fetch_sub(1, Ordering::Relaxed);
    }

    /// Export counters as a BTreeMap for log lines.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("messages_received".to_string(), self.messages_received.load(Ordering::Relaxed));
        m.insert("stream_errors".to_string(), self.stream_errors.load(Ordering::Relaxed));
        m.insert("events_aggregated".to_string(), self.events_aggregated.load(Ordering::Relaxed));
        m.insert("decode_failures".to_string(), self.decode_failures.load(Ordering::Relaxed));
        m.insert("store_failures".to_string(), self.store_failures.load(Ordering::Relaxed));
        m.insert("workers_running".to_string(), self.workers_running.load(Ordering::Relaxed));
        if let Ok(tracker) = self.aggregation_ns.lock() {
            if let Some(p50) = tracker.percentile(50) {
                m.insert("aggregation_p50_ns".to_string(), p50);
            }
            if let Some(p99) = tracker.percentile(99) {
                m.insert("aggregation_p99_ns".to_string(), p99);
            }
        }
        m
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = ServiceMetrics::new();

        metrics.record_message();
        metrics.record_message();
        metrics.record_message();
        metrics.record_decode_failure();
        metrics.record_aggregated(500, 0);
        metrics.record_aggregated(1000, 2);

        let exported = metrics.export();
        assert_eq!(exported["messages_received"], 3);
        assert_eq!(exported["decode_failures"], 1);
        assert_eq!(exported["events_aggregated"], 2);
        assert_eq!(exported["store_failures"], 2);
        // Two samples: the nearest-rank index floors to the first one.
        assert_eq!(exported["aggregation_p50_ns"], 500);
        assert_eq!(exported["aggregation_p99_ns"], 500);
    }

    #[test]
    fn test_worker_gauge() {
        let metrics = ServiceMetrics::new();
        metrics.worker_started();
        metrics.worker_started();
        metrics.worker_stopped();
        assert_eq!(metrics.export()["workers_running"], 1);
    }

    #[test]
    fn test_export_without_latency_samples() {
        let metrics = ServiceMetrics::new();
        let exported = metrics.export();
        assert!(!exported.contains_key("aggregation_p50_ns"));
        assert_eq!(exported["stream_errors"], 0);
    }

    #[test]
    fn test_latency_tracker_percentile() {
        let mut tracker = LatencyTracker::new(100);

        for i in 1..=100 {
            tracker.record(i);
        }

        let p50 = tracker.percentile(50).unwrap();
        assert!((49..=51).contains(&p50));

        let p99 = tracker.percentile(99).unwrap();
        assert!((98..=100).contains(&p99));
    }

    #[test]
    fn test_latency_tracker_window_eviction() {
        let mut tracker = LatencyTracker::new(3);

        tracker.record(10);
        tracker.record(20);
        tracker.record(30);
        tracker.record(40); // Should evict 10

        assert_eq!(tracker.percentile(0), Some(20));
        assert_eq!(tracker.percentile(100), Some(40));
    }
}
