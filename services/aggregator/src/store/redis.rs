//! Redis/Valkey aggregate store
//!
//! Every method is a single server round trip. Extremes use a Lua
//! compare-and-set so the read and the conditional write execute as one
//! atomic server-side step.

use ::redis::aio::ConnectionManager;
use ::redis::{Client, RedisError, Script};
use async_trait::async_trait;
use tracing::info;

use super::{AggregateReader, AggregateStore, StoreResult};
use crate::error::{StartupError, StoreOperationError};

const RAISE_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if (not current) or tonumber(ARGV[1]) > tonumber(current) then
  redis.call('SET', KEYS[1], ARGV[1])
  return 1
end
return 0
";

const LOWER_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if (not current) or tonumber(ARGV[1]) < tonumber(current) then
  redis.call('SET', KEYS[1], ARGV[1])
  return 1
end
return 0
";

/// Aggregate store backed by a shared Redis-compatible server.
///
/// Cloning is cheap; clones share the reconnecting connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    raise: Script,
    lower: Script,
}

impl RedisStore {
    /// Connect to `addr`, either `host:port` or a full `redis://` URL.
    pub async fn connect(addr: &str) -> Result<Self, StartupError> {
        let url = store_url(addr);
        let client =
            Client::open(url.as_str()).map_err(|e| StartupError::StoreUnavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StartupError::StoreUnavailable(e.to_string()))?;

        info!(addr = %addr, "Connected to aggregate store");
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            raise: Script::new(RAISE_SCRIPT),
            lower: Script::new(LOWER_SCRIPT),
        }
    }

    async fn compare_and_set(
        &self,
        script: &Script,
        command: &'static str,
        key: &str,
        value: f64,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let changed: i64 = script
            .key(key)
            .arg(value.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| op_error(command, key, e))?;
        Ok(changed == 1)
    }
}

fn store_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{addr}")
    }
}

/// Last rank to remove so that the `keep` highest-ranked members survive.
fn trim_stop(keep: usize) -> i64 {
    -clamp_rank(keep) - 1
}

/// Last rank to return so that at most `limit` members come back.
fn top_stop(limit: usize) -> i64 {
    clamp_rank(limit) - 1
}

fn clamp_rank(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX - 1)
}

fn op_error(command: &'static str, key: &str, err: RedisError) -> StoreOperationError {
    let key = key.to_string();
    let message = err.to_string();
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        StoreOperationError::Unavailable {
            command,
            key,
            message,
        }
    } else {
        StoreOperationError::Rejected {
            command,
            key,
            message,
        }
    }
}

#[async_trait]
impl AggregateStore for RedisStore {
    async fn set_max(&self, key: &str, value: f64) -> StoreResult<bool> {
        self.compare_and_set(&self.raise, "EVALSHA(setmax)", key, value)
            .await
    }

    async fn set_min(&self, key: &str, value: f64) -> StoreResult<bool> {
        self.compare_and_set(&self.lower, "EVALSHA(setmin)", key, value)
            .await
    }

    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        ::redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("INCRBY", key, e))
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        ::redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("HINCRBY", key, e))
    }

    async fn hincr_float(&self, key: &str, field: &str, delta: f64) -> StoreResult<f64> {
        let mut conn = self.conn.clone();
        ::redis::cmd("HINCRBYFLOAT")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("HINCRBYFLOAT", key, e))
    }

    async fn zincr(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64> {
        let mut conn = self.conn.clone();
        ::redis::cmd("ZINCRBY")
            .arg(key)
            .arg(delta)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("ZINCRBY", key, e))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _added: i64 = ::redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("ZADD", key, e))?;
        Ok(())
    }

    async fn ztrim_to_newest(&self, key: &str, keep: usize) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let removed: i64 = ::redis::cmd("ZREMRANGEBYRANK")
            .arg(key)
            .arg(0)
            .arg(trim_stop(keep))
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("ZREMRANGEBYRANK", key, e))?;
        Ok(removed.max(0) as u64)
    }
}

#[async_trait]
impl AggregateReader for RedisStore {
    async fn get_f64(&self, key: &str) -> StoreResult<Option<f64>> {
        let mut conn = self.conn.clone();
        ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("GET", key, e))
    }

    async fn get_i64(&self, key: &str) -> StoreResult<Option<i64>> {
        let mut conn = self.conn.clone();
        ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("GET", key, e))
    }

    async fn hget_f64(&self, key: &str, field: &str) -> StoreResult<Option<f64>> {
        let mut conn = self.conn.clone();
        ::redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("HGET", key, e))
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let mut conn = self.conn.clone();
        ::redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("ZSCORE", key, e))
    }

    async fn ztop(&self, key: &str, limit: usize) -> StoreResult<Vec<(String, f64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        ::redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(0)
            .arg(top_stop(limit))
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("ZREVRANGE", key, e))
    }

    async fn zall(&self, key: &str) -> StoreResult<Vec<(String, f64)>> {
        let mut conn = self.conn.clone();
        ::redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("ZRANGE", key, e))
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        ::redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| op_error("ZCARD", key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_url() {
        assert_eq!(store_url("valkey:6379"), "redis://valkey:6379");
        assert_eq!(store_url("redis://cache:6380/1"), "redis://cache:6380/1");
    }

    #[test]
    fn test_trim_stop() {
        assert_eq!(trim_stop(20), -21);
        // keep nothing: 0..-1 is the whole set
        assert_eq!(trim_stop(0), -1);
        assert_eq!(trim_stop(usize::MAX), -i64::MAX);
    }

    #[test]
    fn test_top_stop_never_wraps() {
        assert_eq!(top_stop(10), 9);
        // 0..-1 would return the whole set
        assert_eq!(top_stop(0), -1);
        assert_eq!(top_stop(usize::MAX), i64::MAX - 2);
        assert!(top_stop(usize::MAX) > 0);
    }
}
