//! Sales Aggregation Service
//!
//! Consumes sale events from a partitioned stream and keeps the dashboard
//! aggregates in a shared Redis/Valkey store current:
//! - All-time price extremes
//! - Global and per-category product rankings by quantity
//! - Per-category price/quantity sums and event counts
//! - Per-category report counters
//! - Rolling price history for electronics products
//!
//! Every aggregate mutation is one atomic store call, so partition workers
//! never coordinate with each other in-process.
//!
//! # Architecture
//!
//! ```text
//!      Stream partitions
//!   ┌──────┬──────┬──────┐
//!   │  p0  │  p1  │  pN  │
//!   └──┬───┴──┬───┴──┬───┘
//!      │      │      │
//!   ┌──▼──┐┌──▼──┐┌──▼──┐
//!   │Work.││Work.││Work.│  ← decode, resolve category, in arrival order
//!   └──┬──┘└──┬──┘└──┬──┘
//!      │      │      │
//!   ┌──▼──────▼──────▼──┐
//!   │    Aggregator     │  ← fixed sequence of atomic store operations
//!   └─────────┬─────────┘
//!             │
//!   ┌─────────▼─────────┐
//!   │  Aggregate store  │ ──► dashboard read views
//!   └───────────────────┘
//! ```

pub mod aggregation;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod shutdown;
pub mod store;
pub mod stream;
pub mod views;
pub mod worker;

// Service version
pub const SERVICE_VERSION: &str = "0.1.0";
