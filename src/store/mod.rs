//! Store Module
//!
//! The key-value capability set the coordination components are built on,
//! plus two backends: a process-local [`MemoryStore`] and a shared [`RedisStore`].
//!
//! Every correctness guarantee of the coordination layer reduces to three
//! atomic primitives here: `increment`, `set_if_absent_with_expiry` and
//! `compare_and_delete`.

mod entry;
mod lru;
mod memory;
mod redis;
mod stats;


use std::time::Duration;

use async_trait::async_trait;

use crate::clock::duration_ms;
use crate::error::StoreError;

// Re-export public types
pub use entry::StoreEntry;
pub use lru::LruTracker;
pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use stats::StoreStats;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// == Window Count ==
/// Counter value and remaining lifetime after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Post-increment counter value
    pub count: u64,
    /// Time until the counter expires
    pub ttl: Duration,
}

// == Key-Value Store Trait ==
/// Minimal capability set of the shared key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored at `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` at `key`, replacing any previous value, expiring after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Stores `value` only if `key` holds no unexpired value. Returns whether it was stored.
    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Atomically increments the integer at `key`, creating it at 1 when absent.
    async fn increment(&self, key: &str) -> StoreResult<u64>;

    /// Sets the expiry of an existing key. Returns false when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining lifetime of `key`; `None` when absent or stored without expiry.
    async fn ttl_remaining(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Deletes `key` only if it currently holds `expected`. Returns whether it was removed.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Deletes `key` unconditionally. Returns whether it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Increments `key` and starts its expiry on the first increment.
    ///
    /// This default composes `increment`, `expire` and `ttl_remaining` and is
    /// NOT atomic: a caller that dies between the increment and the expire
    /// leaves a counter without expiry. Such a counter is healed by the next
    /// call, which finds no TTL and applies one. Backends able to run the
    /// composite in one step override this.
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<WindowCount> {
        let count = self.increment(key).await?;
        if count == 1 {
            self.expire(key, ttl).await?;
            return Ok(WindowCount { count, ttl });
        }

        match self.ttl_remaining(key).await? {
            Some(remaining) => Ok(WindowCount {
                count,
                ttl: remaining,
            }),
            None => {
                self.expire(key, ttl).await?;
                Ok(WindowCount { count, ttl })
            }
        }
    }

    /// Store statistics; backends without counters report defaults.
    async fn stats(&self) -> StoreResult<StoreStats> {
        Ok(StoreStats::default())
    }
}

/// Expiry in whole milliseconds for a store command: rounded up, never 0.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    duration_ms(ttl).max(1)
}

/// Checks key and value limits shared by all backends.
pub(crate) fn validate_entry(key: &str, value: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidEntry("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(StoreError::InvalidEntry(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    if value.len() > MAX_VALUE_SIZE {
        return Err(StoreError::InvalidEntry(format!(
            "Value exceeds maximum size of {} bytes",
            MAX_VALUE_SIZE
        )));
    }
    Ok(())
}
