use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sales_aggregator::config::AggregatorConfig;
use sales_aggregator::engine::AggregationEngine;
use sales_aggregator::metrics::ServiceMetrics;
use sales_aggregator::shutdown;
use sales_aggregator::store::RedisStore;
use sales_aggregator::stream::KafkaBroker;
use sales_aggregator::SERVICE_VERSION;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = SERVICE_VERSION, "Starting sales aggregation service");

    let result = run().await;
    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "Sales aggregation service failed");
    }
    result
}

async fn run() -> Result<(), anyhow::Error> {
    let config = AggregatorConfig::from_env().context("reading configuration")?;
    tracing::info!(
        brokers = ?config.brokers,
        topic = %config.topic,
        store = %config.store_addr,
        "Configuration loaded"
    );

    let store = RedisStore::connect(&config.store_addr)
        .await
        .context("connecting to aggregate store")?;
    let broker = KafkaBroker::new(&config);

    let engine = AggregationEngine::new(Arc::new(broker), Arc::new(store), config.engine());
    let metrics = engine.metrics();

    let cancel = CancellationToken::new();
    let handle = engine
        .start(cancel.clone())
        .await
        .context("starting aggregation engine")?;

    let reporter = config.metrics_log_interval.map(|interval| {
        tokio::spawn(log_metrics_every(Arc::clone(&metrics), interval, cancel.clone()))
    });

    let signals = shutdown::cancel_on_signal(cancel.clone());
    cancel.cancelled().await;

    let summary = handle.shutdown_and_join().await;
    let _ = signals.await;
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }

    log_metrics(&metrics);
    tracing::info!(
        workers = summary.reports.len(),
        events_aggregated = summary.events_aggregated(),
        panicked = ?summary.panicked,
        aborted = ?summary.aborted,
        "Sales aggregation service stopped"
    );

    Ok(())
}

async fn log_metrics_every(
    metrics: Arc<ServiceMetrics>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => log_metrics(&metrics),
        }
    }
}

fn log_metrics(metrics: &ServiceMetrics) {
    match serde_json::to_string(&metrics.export()) {
        Ok(counters) => tracing::info!(counters = %counters, "Service counters"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode service counters"),
    }
}
