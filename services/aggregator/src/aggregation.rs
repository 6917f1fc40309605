//! Per-event aggregation
//!
//! Turns one decoded sale into the fixed sequence of store operations that
//! keeps every aggregate view current:
//!
//! 1. global price extremes (atomic compare-and-set each)
//! 2. global and per-category ranking scores
//! 3. per-category price sum, quantity sum, and event count
//! 4. per-category report counter
//! 5. electronics only: append a price sample, then trim the history
//!
//! Every operation is issued on its own, in this order, whatever happened
//! to the previous one. Failures are collected for the caller to log; a
//! partially applied event is never rolled back.

use std::sync::Arc;

use types::category::CategoryLabel;
use types::sale::SaleEvent;

use crate::error::StoreOperationError;
use crate::keys;
use crate::store::{AggregateStore, StoreResult};

/// Wall clock used to timestamp price-history samples.
pub trait Clock: Send + Sync {
    /// Current Unix time in seconds.
    fn now_secs(&self) -> i64;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Outcome of applying one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationReport {
    /// Store operations issued.
    pub operations: u32,
    /// Operations the store failed.
    pub failures: Vec<StoreOperationError>,
}

impl AggregationReport {
    fn track<T>(&mut self, result: StoreResult<T>) {
        self.operations += 1;
        if let Err(e) = result {
            self.failures.push(e);
        }
    }

    /// Whether every operation succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies sale events to a shared aggregate store.
///
/// Holds no mutable state of its own, so one instance is shared by every
/// partition worker.
pub struct Aggregator {
    store: Arc<dyn AggregateStore>,
    clock: Arc<dyn Clock>,
    price_history_len: usize,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        clock: Arc<dyn Clock>,
        price_history_len: usize,
    ) -> Self {
        Self {
            store,
            clock,
            price_history_len,
        }
    }

    /// Apply `sale`, already resolved to `label`, to every aggregate view.
    pub async fn apply(&self, sale: &SaleEvent, label: CategoryLabel) -> AggregationReport {
        let mut report = AggregationReport::default();
        let store = self.store.as_ref();

        let price = sale.price().as_f64();
        let quantity = sale.quantity_sold().as_f64();
        let product = sale.product_id().as_str();
        let category = label.as_str();
        let category_ranking = keys::ranking(label);
        let report_counter = keys::report_total(label);

        report.track(store.set_max(keys::PRICE_MAX, price).await);
        report.track(store.set_min(keys::PRICE_MIN, price).await);

        report.track(store.zincr(keys::RANKING_GLOBAL, product, quantity).await);
        report.track(store.zincr(&category_ranking, product, quantity).await);

        report.track(store.hincr_float(keys::STATS_PRICE_SUM, category, price).await);
        report.track(store.hincr_float(keys::STATS_QUANTITY_SUM, category, quantity).await);
        report.track(store.hincr(keys::STATS_COUNT, category, 1).await);

        report.track(store.incr(&report_counter, 1).await);

        if label.tracks_price_history() {
            let timestamp = self.clock.now_secs();
            let history = keys::price_history(sale.product_id());
            let member = keys::history_member(price, timestamp);

            report.track(store.zadd(&history, &member, timestamp as f64).await);
            report.track(store.ztrim_to_newest(&history, self.price_history_len).await);
        }

        report
    }
}
