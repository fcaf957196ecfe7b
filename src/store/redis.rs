//! Redis Store Module
//!
//! Shared [`KeyValueStore`] backend on Redis. Compare-and-delete and the
//! increment-with-expiry composite run as Lua scripts so each is one atomic
//! step on the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, RedisError, Script};
use tokio::time::timeout;
use tracing::{info, warn};

use super::{
    ttl_millis, validate_entry, KeyValueStore, StoreResult, StoreStats, WindowCount,
};
use crate::error::StoreError;

/// Deletes KEYS[1] only when it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Increments KEYS[1]; starts its ARGV[1] ms expiry on the first increment
/// or when a previous caller left it without one.
const INCREMENT_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

// == Redis Store ==
/// [`KeyValueStore`] backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
    compare_and_delete: Script,
    increment_with_expiry: Script,
}

impl RedisStore {
    /// Connects to `url` (e.g. "redis://127.0.0.1:6379").
    ///
    /// `op_timeout` bounds every command; a command exceeding it is reported
    /// as [`StoreError::Unavailable`].
    pub async fn connect(url: &str, op_timeout: Duration) -> StoreResult<Self> {
        info!("Connecting to Redis store at {}", url);

        let client = Client::open(url).map_err(map_redis_error)?;
        let conn = timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!("connection to {} timed out", url))
            })?
            .map_err(map_redis_error)?;

        Ok(Self {
            conn,
            op_timeout,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            increment_with_expiry: Script::new(INCREMENT_WITH_EXPIRY),
        })
    }

    /// Runs one command against a clone of the managed connection, bounded by `op_timeout`.
    async fn run<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> StoreResult<T> {
        let mut conn = self.conn.clone();
        timeout(self.op_timeout, cmd.query_async(&mut conn))
            .await
            .map_err(|_| StoreError::Unavailable("redis command timed out".to_string()))?
            .map_err(map_redis_error)
    }
}

/// Connection-level failures mean the store is unreachable; anything else is a rejected command.
fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() {
        warn!("Redis unreachable: {}", err);
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.run(redis::cmd("GET").arg(key)).await
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        validate_entry(key, value)?;
        self.run(redis::cmd("SET").arg(key).arg(value).arg("PX").arg(ttl_millis(ttl)))
            .await
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        validate_entry(key, value)?;
        let reply: Option<String> = self
            .run(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl)),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn increment(&self, key: &str) -> StoreResult<u64> {
        self.run(redis::cmd("INCR").arg(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let updated: i64 = self
            .run(redis::cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)))
            .await?;
        Ok(updated == 1)
    }

    async fn ttl_remaining(&self, key: &str) -> StoreResult<Option<Duration>> {
        // -2: missing key, -1: no expiry
        let pttl: i64 = self.run(redis::cmd("PTTL").arg(key)).await?;
        Ok((pttl >= 0).then(|| Duration::from_millis(pttl as u64)))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = timeout(
            self.op_timeout,
            self.compare_and_delete
                .key(key)
                .arg(expected)
                .invoke_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Unavailable("redis script timed out".to_string()))?
        .map_err(map_redis_error)?;
        Ok(removed == 1)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let removed: i64 = self.run(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<WindowCount> {
        let mut conn = self.conn.clone();
        let (count, ttl_ms): (u64, i64) = timeout(
            self.op_timeout,
            self.increment_with_expiry
                .key(key)
                .arg(ttl_millis(ttl))
                .invoke_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Unavailable("redis script timed out".to_string()))?
        .map_err(map_redis_error)?;

        Ok(WindowCount {
            count,
            ttl: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let dbsize: usize = self.run(&redis::cmd("DBSIZE")).await?;
        let mut stats = StoreStats::new();
        stats.set_total_entries(dbsize);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisStore::connect("not-a-url", Duration::from_millis(200)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // Port 1 on loopback refuses connections
        let result = RedisStore::connect("redis://127.0.0.1:1", Duration::from_millis(500)).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
