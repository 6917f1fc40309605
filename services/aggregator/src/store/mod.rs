//! Aggregate store client
//!
//! The engine never coordinates workers itself: every aggregate mutation is
//! exactly one call on [`AggregateStore`], and each call must be atomic on
//! the store side. Two implementations exist:
//!
//! - [`RedisStore`]: the shared Redis/Valkey deployment dashboards read from.
//! - [`MemoryStore`]: a process-local store with the same semantics, used by
//!   tests and local runs.

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::error::StoreOperationError;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

pub type StoreResult<T> = Result<T, StoreOperationError>;

/// Atomic write primitives the aggregation algorithm is built from.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Raise the scalar at `key` to `value` if it is absent or lower.
    /// Returns whether the stored value changed.
    async fn set_max(&self, key: &str, value: f64) -> StoreResult<bool>;

    /// Lower the scalar at `key` to `value` if it is absent or higher.
    /// Returns whether the stored value changed.
    async fn set_min(&self, key: &str, value: f64) -> StoreResult<bool>;

    /// Add `delta` to the integer counter at `key`.
    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64>;

    /// Add `delta` to the integer hash field `key[field]`.
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Add `delta` to the float hash field `key[field]`.
    async fn hincr_float(&self, key: &str, field: &str, delta: f64) -> StoreResult<f64>;

    /// Add `delta` to the score of `member` in the sorted set at `key`.
    async fn zincr(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64>;

    /// Insert or rescore `member` in the sorted set at `key`.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// Drop the lowest-ranked members so at most `keep` remain.
    /// Returns the number of members removed.
    async fn ztrim_to_newest(&self, key: &str, keep: usize) -> StoreResult<u64>;
}

/// Read primitives used by dashboard views.
#[async_trait]
pub trait AggregateReader: Send + Sync {
    async fn get_f64(&self, key: &str) -> StoreResult<Option<f64>>;

    async fn get_i64(&self, key: &str) -> StoreResult<Option<i64>>;

    async fn hget_f64(&self, key: &str, field: &str) -> StoreResult<Option<f64>>;

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    /// Up to `limit` members, highest score first.
    async fn ztop(&self, key: &str, limit: usize) -> StoreResult<Vec<(String, f64)>>;

    /// Every member, lowest score first.
    async fn zall(&self, key: &str) -> StoreResult<Vec<(String, f64)>>;

    async fn zcard(&self, key: &str) -> StoreResult<u64>;
}
