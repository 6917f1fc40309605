//! Process-local aggregate store
//!
//! Mirrors the Redis semantics the engine relies on: values keep a single
//! type per key (`WRONGTYPE` otherwise), sorted sets order by score then
//! member, and rank trimming removes from the low end. A single mutex makes
//! every call atomic with respect to every other call.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{AggregateReader, AggregateStore, StoreResult};
use crate::error::StoreOperationError;

#[derive(Debug, Default)]
struct State {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    String,
    Hash,
    ZSet,
}

impl State {
    fn ensure_kind(&self, command: &'static str, key: &str, kind: Kind) -> StoreResult<()> {
        let conflict = (kind != Kind::String && self.strings.contains_key(key))
            || (kind != Kind::Hash && self.hashes.contains_key(key))
            || (kind != Kind::ZSet && self.zsets.contains_key(key));
        if conflict {
            return Err(StoreOperationError::Rejected {
                command,
                key: key.to_string(),
                message: "WRONGTYPE Operation against a key holding the wrong kind of value"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory [`AggregateStore`] with optional failure injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    failing_prefixes: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call on a key starting with `prefix` fail as unavailable.
    pub fn fail_keys_with_prefix(&self, prefix: impl Into<String>) {
        lock(&self.failing_prefixes).push(prefix.into());
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        lock(&self.failing_prefixes).clear();
    }

    fn check(&self, command: &'static str, key: &str) -> StoreResult<()> {
        let failing = lock(&self.failing_prefixes);
        if failing.iter().any(|p| key.starts_with(p.as_str())) {
            return Err(StoreOperationError::Unavailable {
                command,
                key: key.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn compare_and_set(
        &self,
        command: &'static str,
        key: &str,
        value: f64,
        wins: Ordering,
    ) -> StoreResult<bool> {
        self.check(command, key)?;
        let mut state = lock(&self.state);
        state.ensure_kind(command, key, Kind::String)?;

        let current = match state.strings.get(key) {
            Some(raw) => Some(parse_f64(command, key, raw)?),
            None => None,
        };
        let replace = match current {
            None => true,
            Some(current) => value.partial_cmp(&current) == Some(wins),
        };
        if replace {
            state.strings.insert(key.to_string(), value.to_string());
        }
        Ok(replace)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn parse_f64(command: &'static str, key: &str, raw: &str) -> StoreResult<f64> {
    raw.parse().map_err(|_| StoreOperationError::Rejected {
        command,
        key: key.to_string(),
        message: "value is not a valid float".to_string(),
    })
}

fn parse_i64(command: &'static str, key: &str, raw: &str) -> StoreResult<i64> {
    raw.parse().map_err(|_| StoreOperationError::Rejected {
        command,
        key: key.to_string(),
        message: "value is not an integer or out of range".to_string(),
    })
}

/// Redis sorted-set order: score ascending, then member bytes ascending.
fn by_rank(a: &(String, f64), b: &(String, f64)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}

fn sorted_members(zset: Option<&HashMap<String, f64>>) -> Vec<(String, f64)> {
    let mut members: Vec<(String, f64)> = zset
        .map(|z| z.iter().map(|(m, s)| (m.clone(), *s)).collect())
        .unwrap_or_default();
    members.sort_by(by_rank);
    members
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn set_max(&self, key: &str, value: f64) -> StoreResult<bool> {
        self.compare_and_set("SETMAX", key, value, Ordering::Greater)
    }

    async fn set_min(&self, key: &str, value: f64) -> StoreResult<bool> {
        self.compare_and_set("SETMIN", key, value, Ordering::Less)
    }

    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.check("INCRBY", key)?;
        let mut state = lock(&self.state);
        state.ensure_kind("INCRBY", key, Kind::String)?;

        let current = match state.strings.get(key) {
            Some(raw) => parse_i64("INCRBY", key, raw)?,
            None => 0,
        };
        let next = current + delta;
        state.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.check("HINCRBY", key)?;
        let mut state = lock(&self.state);
        state.ensure_kind("HINCRBY", key, Kind::Hash)?;

        let hash = state.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(raw) => parse_i64("HINCRBY", key, raw)?,
            None => 0,
        };
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hincr_float(&self, key: &str, field: &str, delta: f64) -> StoreResult<f64> {
        self.check("HINCRBYFLOAT", key)?;
        let mut state = lock(&self.state);
        state.ensure_kind("HINCRBYFLOAT", key, Kind::Hash)?;

        let hash = state.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(raw) => parse_f64("HINCRBYFLOAT", key, raw)?,
            None => 0.0,
        };
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn zincr(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64> {
        self.check("ZINCRBY", key)?;
        let mut state = lock(&self.state);
        state.ensure_kind("ZINCRBY", key, Kind::ZSet)?;

        let score = state
            .zsets
            .entry(key.to_string())
            .or_default()
            .entry(member.to_string())
            .or_insert(0.0);
        *score += delta;
        Ok(*score)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.check("ZADD", key)?;
        let mut state = lock(&self.state);
        state.ensure_kind("ZADD", key, Kind::ZSet)?;

        state
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn ztrim_to_newest(&self, key: &str, keep: usize) -> StoreResult<u64> {
        self.check("ZREMRANGEBYRANK", key)?;
        let mut state = lock(&self.state);
        state.ensure_kind("ZREMRANGEBYRANK", key, Kind::ZSet)?;

        let Some(zset) = state.zsets.get_mut(key) else {
            return Ok(0);
        };
        if zset.len() <= keep {
            return Ok(0);
        }

        let members = sorted_members(Some(&*zset));
        let excess = members.len() - keep;
        for (member, _) in &members[..excess] {
            zset.remove(member);
        }
        if zset.is_empty() {
            state.zsets.remove(key);
        }
        Ok(excess as u64)
    }
}

#[async_trait]
impl AggregateReader for MemoryStore {
    async fn get_f64(&self, key: &str) -> StoreResult<Option<f64>> {
        self.check("GET", key)?;
        let state = lock(&self.state);
        state.ensure_kind("GET", key, Kind::String)?;
        state
            .strings
            .get(key)
            .map(|raw| parse_f64("GET", key, raw))
            .transpose()
    }

    async fn get_i64(&self, key: &str) -> StoreResult<Option<i64>> {
        self.check("GET", key)?;
        let state = lock(&self.state);
        state.ensure_kind("GET", key, Kind::String)?;
        state
            .strings
            .get(key)
            .map(|raw| parse_i64("GET", key, raw))
            .transpose()
    }

    async fn hget_f64(&self, key: &str, field: &str) -> StoreResult<Option<f64>> {
        self.check("HGET", key)?;
        let state = lock(&self.state);
        state.ensure_kind("HGET", key, Kind::Hash)?;
        state
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .map(|raw| parse_f64("HGET", key, raw))
            .transpose()
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.check("ZSCORE", key)?;
        let state = lock(&self.state);
        state.ensure_kind("ZSCORE", key, Kind::ZSet)?;
        Ok(state.zsets.get(key).and_then(|z| z.get(member)).copied())
    }

    async fn ztop(&self, key: &str, limit: usize) -> StoreResult<Vec<(String, f64)>> {
        self.check("ZREVRANGE", key)?;
        let state = lock(&self.state);
        state.ensure_kind("ZREVRANGE", key, Kind::ZSet)?;
        let mut members = sorted_members(state.zsets.get(key));
        members.reverse();
        members.truncate(limit);
        Ok(members)
    }

    async fn zall(&self, key: &str) -> StoreResult<Vec<(String, f64)>> {
        self.check("ZRANGE", key)?;
        let state = lock(&self.state);
        state.ensure_kind("ZRANGE", key, Kind::ZSet)?;
        Ok(sorted_members(state.zsets.get(key)))
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.check("ZCARD", key)?;
        let state = lock(&self.state);
        state.ensure_kind("ZCARD", key, Kind::ZSet)?;
        Ok(state.zsets.get(key).map_or(0, |z| z.len() as u64))
    }
}
