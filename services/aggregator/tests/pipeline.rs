//! End-to-end tests for the aggregation pipeline
//!
//! Drives the engine over the in-memory stream and store and checks the
//! resulting aggregates the way a dashboard would read them.
//!
//! Tests include:
//! - Single electronics event across every view
//! - Extremes under partition interleaving
//! - Report counters and category means
//! - Price history retention
//! - Skipped payloads and unknown categories
//! - Store failures and shutdown

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use sales_aggregator::aggregation::Clock;
use sales_aggregator::engine::{AggregationEngine, EngineConfig, EngineSummary};
use sales_aggregator::store::{AggregateReader, MemoryStore};
use sales_aggregator::stream::{memory_stream, MemoryProducer};
use sales_aggregator::views;
use sales_aggregator::worker::{StopReason, WorkerState};
use types::category::CategoryLabel;
use types::ids::ProductId;

/// Clock that advances one second per reading.
struct StepClock(AtomicI64);

impl StepClock {
    fn starting_at(secs: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(secs)))
    }
}

impl Clock for StepClock {
    fn now_secs(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        receive_error_backoff: Duration::ZERO,
        shutdown_grace: Duration::from_secs(5),
        ..EngineConfig::default()
    }
}

fn sale_json(category: i64, product: &str, price: &str, quantity: u64) -> String {
    format!(
        r#"{{"categoria": {category}, "producto_id": "{product}", "precio": {price}, "cantidad_vendida": {quantity}}}"#
    )
}

/// Run the engine over whatever `feed` produces, until every partition ends.
async fn run_pipeline<F>(partitions: usize, store: Arc<MemoryStore>, feed: F) -> EngineSummary
where
    F: FnOnce(&mut MemoryProducer),
{
    let (broker, mut producer) = memory_stream(partitions);
    let engine = AggregationEngine::new(Arc::new(broker), store, test_config())
        .with_clock(StepClock::starting_at(1_700_000_000));

    let handle = engine.start(CancellationToken::new()).await.unwrap();
    feed(&mut producer);
    drop(producer);

    handle.join().await
}

#[tokio::test]
async fn test_electronics_sale_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let summary = run_pipeline(1, store.clone(), |p| {
        p.send(0, sale_json(1, "P7", "99.99", 3));
    })
    .await;

    assert!(summary.is_clean());
    assert_eq!(summary.events_aggregated(), 1);

    assert_eq!(store.zscore("ranking:global", "P7").await.unwrap(), Some(3.0));
    assert_eq!(store.zscore("ranking:electronica", "P7").await.unwrap(), Some(3.0));
    assert_eq!(
        store.hget_f64("stats:precio:suma", "electronica").await.unwrap(),
        Some(99.99)
    );
    assert_eq!(store.get_i64("reportes:total:electronica").await.unwrap(), Some(1));

    let history = views::price_history(store.as_ref(), &ProductId::new("P7"))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].price, 99.99);
    assert_eq!(history[0].timestamp, 1_700_000_000);
}

#[tokio::test]
async fn test_report_counter_and_mean_price() {
    let store = Arc::new(MemoryStore::new());
    run_pipeline(3, store.clone(), |p| {
        p.send(0, sale_json(2, "R1", "10", 1));
        p.send(1, sale_json(2, "R2", "20", 1));
        p.send(2, sale_json(2, "R1", "30", 1));
    })
    .await;

    let stats = views::category_stats(store.as_ref(), CategoryLabel::Clothing)
        .await
        .unwrap();
    assert_eq!(stats.reports, 3);
    assert_eq!(stats.count, 3);
    assert_eq!(stats.mean_price(), Some(20.0));

    let top = views::top_products(store.as_ref(), Some(CategoryLabel::Clothing), 1)
        .await
        .unwrap();
    assert_eq!(top[0].product_id, "R1");
    assert_eq!(top[0].quantity, 2.0);
}

#[tokio::test]
async fn test_price_history_keeps_newest_twenty() {
    let store = Arc::new(MemoryStore::new());
    run_pipeline(1, store.clone(), |p| {
        for i in 0..30 {
            p.send(0, sale_json(1, "TV", &format!("{}", 300 + i), 1));
        }
    })
    .await;

    let history = views::price_history(store.as_ref(), &ProductId::new("TV"))
        .await
        .unwrap();
    assert_eq!(history.len(), 20);
    assert_eq!(history.first().unwrap().timestamp, 1_700_000_010);
    assert_eq!(history.last().unwrap().timestamp, 1_700_000_029);
    assert_eq!(history.last().unwrap().price, 329.0);
}

#[tokio::test]
async fn test_malformed_payload_does_not_block_partition() {
    let store = Arc::new(MemoryStore::new());
    let summary = run_pipeline(1, store.clone(), |p| {
        p.send(0, "{\"categoria\": 1, \"producto_id\": ");
        p.send(0, "[1, 2, 3]");
        p.send(0, "");
        p.send(0, sale_json(3, "H9", "45.5", 2));
    })
    .await;

    let report = &summary.reports[0];
    assert_eq!(report.messages, 4);
    assert_eq!(report.decode_failures, 3);
    assert_eq!(report.aggregated, 1);
    assert_eq!(report.stop_reason, StopReason::StreamEnded);
    assert_eq!(store.zscore("ranking:hogar", "H9").await.unwrap(), Some(2.0));
}

#[tokio::test]
async fn test_unknown_category_only_touches_unknown_aggregates() {
    let store = Arc::new(MemoryStore::new());
    run_pipeline(1, store.clone(), |p| {
        p.send(0, sale_json(99, "X1", "12", 4));
    })
    .await;

    let unknown = views::category_stats(store.as_ref(), CategoryLabel::Unknown)
        .await
        .unwrap();
    assert_eq!(unknown.count, 1);
    assert_eq!(unknown.reports, 1);
    assert_eq!(store.zscore("ranking:desconocida", "X1").await.unwrap(), Some(4.0));
    assert_eq!(store.zscore("ranking:global", "X1").await.unwrap(), Some(4.0));

    for label in CategoryLabel::ALL
        .into_iter()
        .filter(|l| *l != CategoryLabel::Unknown)
    {
        let stats = views::category_stats(store.as_ref(), label).await.unwrap();
        assert_eq!(stats.count, 0, "{label} has a count");
        assert_eq!(stats.reports, 0, "{label} has reports");
        assert_eq!(store.zcard(&format!("ranking:{label}")).await.unwrap(), 0);
    }
    assert_eq!(store.zcard("history:electronica:X1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_store_failure_does_not_stop_processing() {
    let store = Arc::new(MemoryStore::new());
    store.fail_keys_with_prefix("ventas:global");

    let summary = run_pipeline(1, store.clone(), |p| {
        p.send(0, sale_json(4, "B1", "8", 1));
        p.send(0, sale_json(4, "B2", "9", 1));
    })
    .await;

    let report = &summary.reports[0];
    assert_eq!(report.aggregated, 2);
    assert_eq!(report.store_failures, 4);

    store.heal();
    let extremes = views::price_extremes(store.as_ref()).await.unwrap();
    assert_eq!(extremes.max, None);
    assert_eq!(store.get_i64("reportes:total:belleza").await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_shutdown_leaves_every_worker_stopped() {
    let (broker, _producer) = memory_stream(4);
    let engine = AggregationEngine::new(
        Arc::new(broker),
        Arc::new(MemoryStore::new()),
        test_config(),
    );
    let cancel = CancellationToken::new();
    let handle = engine.start(cancel.clone()).await.unwrap();

    let watches: Vec<_> = handle
        .partitions()
        .into_iter()
        .filter_map(|p| handle.watch_worker(p))
        .collect();
    assert_eq!(watches.len(), 4);

    cancel.cancel();
    let summary = handle.shutdown_and_join().await;

    assert!(summary.is_clean());
    assert_eq!(summary.reports.len(), 4);
    for watch in watches {
        assert_eq!(*watch.borrow(), WorkerState::Stopped);
    }
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn extremes_independent_of_partition_interleaving(
        assignment in prop::collection::vec(0..4i32, 4),
        order in Just(vec!["5", "12", "3", "20"]).prop_shuffle(),
    ) {
        let store = Arc::new(MemoryStore::new());
        block_on(run_pipeline(4, store.clone(), |p| {
            for (price, partition) in order.iter().zip(&assignment) {
                p.send(*partition, sale_json(2, "R1", price, 1));
            }
        }));

        let extremes = block_on(views::price_extremes(store.as_ref())).unwrap();
        prop_assert_eq!(extremes.max, Some(20.0));
        prop_assert_eq!(extremes.min, Some(3.0));
    }

    #[test]
    fn repeated_event_adds_to_ranking(times in 1usize..40, quantity in 0u64..10_000) {
        let store = Arc::new(MemoryStore::new());
        block_on(run_pipeline(1, store.clone(), |p| {
            for _ in 0..times {
                p.send(0, sale_json(3, "H1", "19.99", quantity));
            }
        }));

        let expected = (times as u64 * quantity) as f64;
        let global = block_on(store.zscore("ranking:global", "H1")).unwrap();
        let home = block_on(store.zscore("ranking:hogar", "H1")).unwrap();
        prop_assert_eq!(global, Some(expected));
        prop_assert_eq!(home, Some(expected));

        let reports = block_on(store.get_i64("reportes:total:hogar")).unwrap();
        prop_assert_eq!(reports, Some(times as i64));
    }
}
