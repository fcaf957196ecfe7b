//! Memory Store Module
//!
//! Process-local key-value store: HashMap storage with LRU capacity bound,
//! TTL expiration and hit/miss statistics. Every operation runs inside one
//! write-lock critical section, which makes increment, set-if-absent and
//! compare-and-delete atomic for all callers sharing the same instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{
    ttl_millis, validate_entry, KeyValueStore, LruTracker, StoreEntry, StoreResult, StoreStats,
    WindowCount,
};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;

// == Retention ==
/// Whether an entry may be evicted to make room before it expires.
///
/// Plain values are evictable. Lock records and window counters are pinned:
/// dropping them early would hand a held lock to a second caller or restart
/// a rate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retention {
    Evictable,
    Pinned,
}

// == Store State ==
/// Everything guarded by the store lock.
#[derive(Debug)]
struct StoreState {
    /// Key-value storage
    entries: HashMap<String, StoreEntry>,
    /// LRU access tracker
    lru: LruTracker,
    /// Performance statistics
    stats: StoreStats,
    /// Maximum number of entries allowed
    max_entries: usize,
}

impl StoreState {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: StoreStats::new(),
            max_entries,
        }
    }

    /// Drops `key` if its TTL has elapsed. Returns true when it was dropped.
    fn expire_if_due(&mut self, key: &str, now_ms: u64) -> bool {
        let due = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(now_ms));
        if due {
            self.remove(key);
            self.stats.record_expirations(1);
        }
        due
    }

    /// Returns the live entry at `key`, purging it first if expired.
    fn live(&mut self, key: &str, now_ms: u64) -> Option<&mut StoreEntry> {
        self.expire_if_due(key, now_ms);
        self.entries.get_mut(key)
    }

    /// Inserts or replaces an entry.
    ///
    /// When the store is full, expired entries are purged first; if none
    /// were, the least recently used evictable key makes room. Pinned
    /// entries are never evicted, so a store full of them refuses the insert.
    fn insert(
        &mut self,
        key: &str,
        entry: StoreEntry,
        retention: Retention,
        now_ms: u64,
    ) -> StoreResult<()> {
        let is_overwrite = self.entries.contains_key(key);

        if !is_overwrite && self.entries.len() >= self.max_entries {
            self.make_room(now_ms)?;
        }

        self.entries.insert(key.to_string(), entry);
        match retention {
            Retention::Evictable => self.lru.touch(key),
            Retention::Pinned => self.lru.remove(key),
        }
        self.stats.set_total_entries(self.entries.len());
        Ok(())
    }

    fn make_room(&mut self, now_ms: u64) -> StoreResult<()> {
        if self.cleanup_expired(now_ms) > 0 {
            return Ok(());
        }

        match self.lru.evict_oldest() {
            Some(evicted) => {
                debug!("Evicting least recently used key '{}'", evicted);
                self.entries.remove(&evicted);
                self.stats.record_eviction();
                Ok(())
            }
            None => {
                warn!(
                    "Memory store full: all {} entries are live pinned records",
                    self.max_entries
                );
                Err(StoreError::CapacityExceeded(format!(
                    "all {} entries are unexpired locks or counters",
                    self.max_entries
                )))
            }
        }
    }

    /// Refreshes recency of an evictable key; pinned keys are not tracked.
    fn touch(&mut self, key: &str) {
        if self.lru.contains(key) {
            self.lru.touch(key);
        }
    }

    fn remove(&mut self, key: &str) -> Option<StoreEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.lru.remove(key);
            self.stats.set_total_entries(self.entries.len());
        }
        removed
    }

    fn cleanup_expired(&mut self, now_ms: u64) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now_ms))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove(key);
        }

        self.stats.record_expirations(expired_keys.len());
        expired_keys.len()
    }
}

// == Memory Store ==
/// In-process [`KeyValueStore`] backend.
///
/// Cloning is cheap and every clone shares the same state, so one instance
/// can be handed to many components and tasks.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
    clock: Arc<dyn Clock>,
    reachable: Arc<AtomicBool>,
}

impl MemoryStore {
    // == Constructor ==
    /// Creates a store holding at most `max_entries` keys, timed by the system clock.
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, Arc::new(SystemClock))
    }

    /// Creates a store timed by `clock`.
    pub fn with_clock(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::new(max_entries))),
            clock,
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates losing (`false`) or regaining (`true`) the connection to the store.
    ///
    /// While unreachable every operation fails with [`StoreError::Unavailable`].
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Removes all expired entries. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        self.state.write().await.cleanup_expired(now)
    }

    /// Number of stored entries, expired or not.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    fn ensure_reachable(&self) -> StoreResult<()> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "memory store marked unreachable".to_string(),
            ))
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_reachable()?;
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;

        let value = state.live(key, now).map(|entry| entry.value.clone());
        match value {
            Some(value) => {
                state.stats.record_hit();
                state.touch(key);
                Ok(Some(value))
            }
            None => {
                state.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.ensure_reachable()?;
        validate_entry(key, value)?;
        let now = self.clock.now_ms();
        let entry = StoreEntry::new(value.to_string(), now, Some(ttl_millis(ttl)));
        self.state
            .write()
            .await
            .insert(key, entry, Retention::Evictable, now)
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.ensure_reachable()?;
        validate_entry(key, value)?;
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;

        if state.live(key, now).is_some() {
            return Ok(false);
        }
        let entry = StoreEntry::new(value.to_string(), now, Some(ttl_millis(ttl)));
        state.insert(key, entry, Retention::Pinned, now)?;
        Ok(true)
    }

    async fn increment(&self, key: &str) -> StoreResult<u64> {
        self.ensure_reachable()?;
        validate_entry(key, "")?;
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;

        match state.live(key, now) {
            Some(entry) => {
                let current: u64 = entry.value.parse().map_err(|_| {
                    StoreError::Backend(format!("value at '{}' is not an integer", key))
                })?;
                let next = current + 1;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                let entry = StoreEntry::new("1".to_string(), now, None);
                state.insert(key, entry, Retention::Pinned, now)?;
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.ensure_reachable()?;
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;

        match state.live(key, now) {
            Some(entry) => {
                entry.set_ttl(now, ttl_millis(ttl));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl_remaining(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.ensure_reachable()?;
        let now = self.clock.now_ms();
        let state = self.state.read().await;

        Ok(state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.ttl_remaining_ms(now))
            .map(Duration::from_millis))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.ensure_reachable()?;
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;

        let matches = state
            .live(key, now)
            .is_some_and(|entry| entry.value == expected);
        if matches {
            state.remove(key);
        }
        Ok(matches)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.ensure_reachable()?;
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;

        if state.expire_if_due(key, now) {
            return Ok(false);
        }
        Ok(state.remove(key).is_some())
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<WindowCount> {
        self.ensure_reachable()?;
        validate_entry(key, "")?;
        let now = self.clock.now_ms();
        let ttl_ms = ttl_millis(ttl);
        let mut state = self.state.write().await;

        let count = match state.live(key, now) {
            Some(entry) => {
                let current: u64 = entry.value.parse().map_err(|_| {
                    StoreError::Backend(format!("value at '{}' is not an integer", key))
                })?;
                entry.value = (current + 1).to_string();
                if entry.expires_at.is_none() {
                    entry.set_ttl(now, ttl_ms);
                }
                current + 1
            }
            None => {
                let entry = StoreEntry::new("1".to_string(), now, Some(ttl_ms));
                state.insert(key, entry, Retention::Pinned, now)?;
                1
            }
        };

        let remaining = state
            .entries
            .get(key)
            .and_then(|entry| entry.ttl_remaining_ms(now))
            .unwrap_or(ttl_ms);
        Ok(WindowCount {
            count,
            ttl: Duration::from_millis(remaining),
        })
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        self.ensure_reachable()?;
        let state = self.state.read().await;
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.entries.len());
        Ok(stats)
    }
}
