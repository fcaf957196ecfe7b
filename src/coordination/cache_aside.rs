//! Cache-Aside Reads
//!
//! "Compute once, reuse many times" on a shared [`KeyValueStore`].
//!
//! - Miss: run the caller's computation, store the JSON payload for `ttl`, return it.
//! - Hit: return the stored value at once. If less than `ttl * refresh_ratio`
//!   remains, a background task recomputes and overwrites the entry. The task
//!   holds the `refresh:<key>` lock so only one refresh per key runs at a time.
//! - Store unreachable: run the computation directly and flag the value as
//!   [`Origin::Degraded`]; nothing is cached.
//!
//! Failed computations are never cached.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::DistributedLock;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::store::KeyValueStore;

/// Prefix of the lock key that guards a background refresh.
pub const REFRESH_LOCK_PREFIX: &str = "refresh:";

/// Default fraction of the TTL below which a hit triggers a refresh.
pub const DEFAULT_REFRESH_RATIO: f64 = 0.5;

// == Origin ==
/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Read from the store
    Cached,
    /// Computed on a miss and stored
    Computed,
    /// Computed because the store failed; not cached
    Degraded,
}

// == Refresh Outcome ==
/// Result of a background refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Entry overwritten with a fresh value
    Refreshed,
    /// Refresh guard not taken: another refresh is running, or the store refused
    AlreadyInFlight,
    /// Computation failed; the cached entry is untouched
    ComputeFailed(String),
    /// Fresh value could not be written
    StoreFailed(String),
}

// == Refresh Handle ==
/// Handle to a spawned refresh. Dropping it does not cancel the refresh.
#[derive(Debug)]
pub struct RefreshHandle(JoinHandle<RefreshOutcome>);

impl RefreshHandle {
    /// Waits for the refresh to finish.
    pub async fn outcome(self) -> RefreshOutcome {
        self.0
            .await
            .unwrap_or_else(|e| RefreshOutcome::ComputeFailed(format!("refresh task failed: {}", e)))
    }
}

// == Fetched ==
/// Value returned by [`CacheAside::get_or_compute`].
#[derive(Debug)]
pub struct Fetched<T> {
    pub value: T,
    pub origin: Origin,
    /// Set when this read scheduled a background refresh
    pub refresh: Option<RefreshHandle>,
}

impl<T> Fetched<T> {
    /// True when the value was not served from or written to the store.
    pub fn is_uncached(&self) -> bool {
        self.origin == Origin::Degraded
    }
}

// == Cache Aside ==
/// Cache-aside reader over a shared store.
#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn KeyValueStore>,
    lock: DistributedLock,
    refresh_ratio: f64,
}

impl CacheAside {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            lock: DistributedLock::with_clock(store.clone(), clock),
            store,
            refresh_ratio: DEFAULT_REFRESH_RATIO,
        }
    }

    /// Sets the refresh threshold as a fraction of the TTL, clamped to `0.0..=1.0`.
    /// 0.0 disables refresh-ahead; NaN keeps [`DEFAULT_REFRESH_RATIO`].
    pub fn with_refresh_ratio(mut self, ratio: f64) -> Self {
        self.refresh_ratio = if ratio.is_nan() {
            DEFAULT_REFRESH_RATIO
        } else {
            ratio.clamp(0.0, 1.0)
        };
        self
    }

    // == Get Or Compute ==
    /// Returns the value at `key`, computing and caching it for `ttl` on a miss.
    ///
    /// A failed `compute` is returned as [`Error::Compute`] and nothing is stored.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if key.is_empty() {
            return Err(Error::InvalidArgument("Key cannot be empty".to_string()));
        }
        if ttl.is_zero() {
            return Err(Error::InvalidArgument("TTL must be positive".to_string()));
        }

        let cached = match self.store.get(key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Cache store unavailable for '{}', computing uncached: {}", key, e);
                let value = compute().await.map_err(Error::Compute)?;
                return Ok(Fetched {
                    value,
                    origin: Origin::Degraded,
                    refresh: None,
                });
            }
        };

        if let Some(payload) = cached {
            match serde_json::from_str::<T>(&payload) {
                Ok(value) => {
                    let refresh = self.refresh_if_due(key, ttl, compute).await;
                    return Ok(Fetched {
                        value,
                        origin: Origin::Cached,
                        refresh,
                    });
                }
                Err(e) => warn!("Discarding undecodable cache entry '{}': {}", key, e),
            }
        }

        debug!("Cache miss for '{}'", key);
        let value = compute().await.map_err(Error::Compute)?;
        let payload = serde_json::to_string(&value)?;

        let origin = match self.store.set_with_expiry(key, &payload, ttl).await {
            Ok(()) => Origin::Computed,
            Err(e) => {
                warn!("Computed '{}' but could not cache it: {}", key, e);
                Origin::Degraded
            }
        };

        Ok(Fetched {
            value,
            origin,
            refresh: None,
        })
    }

    /// Removes the cached value at `key`. Returns whether there was one.
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        Ok(self.store.delete(key).await?)
    }

    /// Spawns a refresh when the remaining TTL of `key` is under the threshold.
    async fn refresh_if_due<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Option<RefreshHandle>
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let threshold = ttl.mul_f64(self.refresh_ratio);
        let remaining = match self.store.ttl_remaining(key).await {
            Ok(Some(remaining)) => remaining,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not read TTL of '{}', skipping refresh: {}", key, e);
                return None;
            }
        };
        if remaining >= threshold {
            return None;
        }

        debug!(
            "Entry '{}' has {:?} left (threshold {:?}), refreshing in background",
            key, remaining, threshold
        );
        let store = self.store.clone();
        let lock = self.lock.clone();
        let key = key.to_string();

        Some(RefreshHandle(tokio::spawn(async move {
            refresh(store, lock, key, ttl, compute).await
        })))
    }
}

/// Body of the background refresh task.
async fn refresh<T, F, Fut>(
    store: Arc<dyn KeyValueStore>,
    lock: DistributedLock,
    key: String,
    ttl: Duration,
    compute: F,
) -> RefreshOutcome
where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let guard_key = format!("{}{}", REFRESH_LOCK_PREFIX, key);
    let guard = match lock.acquire(&guard_key, ttl).await {
        Ok(Some(guard)) => guard,
        Ok(None) => {
            debug!("Refresh of '{}' already in flight", key);
            return RefreshOutcome::AlreadyInFlight;
        }
        Err(e) => return RefreshOutcome::StoreFailed(e.to_string()),
    };

    let outcome = match compute().await {
        Ok(value) => match serde_json::to_string(&value) {
            Ok(payload) => match store.set_with_expiry(&key, &payload, ttl).await {
                Ok(()) => {
                    debug!("Refreshed '{}'", key);
                    RefreshOutcome::Refreshed
                }
                Err(e) => {
                    warn!("Refresh of '{}' could not be stored: {}", key, e);
                    RefreshOutcome::StoreFailed(e.to_string())
                }
            },
            Err(e) => RefreshOutcome::StoreFailed(e.to_string()),
        },
        Err(e) => {
            warn!("Refresh of '{}' failed, keeping cached value: {:#}", key, e);
            RefreshOutcome::ComputeFailed(e.to_string())
        }
    };

    if let Err(e) = lock.release(guard).await {
        warn!("Could not release refresh guard for '{}': {}", key, e);
    }
    outcome
}
