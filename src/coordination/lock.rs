//! Distributed Lock
//!
//! Lease-based mutual exclusion on a shared [`KeyValueStore`].
//!
//! A lock is a key holding a random token with a TTL. Acquisition is a single
//! set-if-absent-with-expiry; release is a single compare-and-delete on the
//! token, so a holder whose lease already expired can never delete the
//! record of the caller that acquired the key after it.
//!
//! Once the lease elapses the key is free for others, even if the original
//! holder is still inside its critical section. Work done after that point is
//! no longer exclusive; `release` returning `false` is how the holder finds out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::{deadline_ms, to_datetime, Clock, SystemClock};
use crate::error::{Error, Result};
use crate::store::{KeyValueStore, MAX_KEY_LENGTH};

// == Lock Handle ==
/// Proof of a successful acquisition. Consumed by [`DistributedLock::release`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockHandle {
    /// Name of the protected resource
    pub key: String,
    /// Token unique to this acquisition
    pub token: String,
    /// When the lease runs out
    pub expires_at: DateTime<Utc>,
}

impl LockHandle {
    /// Rebuilds a handle from a key and token obtained elsewhere (e.g. over HTTP).
    pub fn from_parts(key: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            token: token.into(),
            expires_at: DateTime::<Utc>::MIN_UTC,
        }
    }
}

// == Distributed Lock ==
/// Acquires and releases named leases on a shared store.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    // == Acquire ==
    /// Tries once to take `lock_key` for `lease`.
    ///
    /// Returns `Ok(None)` when another unexpired holder exists or the store
    /// cannot be reached; exclusivity that cannot be proven is never reported.
    /// There is no built-in retry.
    pub async fn acquire(&self, lock_key: &str, lease: Duration) -> Result<Option<LockHandle>> {
        if lock_key.is_empty() || lock_key.len() > MAX_KEY_LENGTH {
            return Err(Error::InvalidArgument(format!(
                "Lock key must be 1 to {} bytes",
                MAX_KEY_LENGTH
            )));
        }
        if lease.is_zero() {
            return Err(Error::InvalidArgument(
                "Lease duration must be positive".to_string(),
            ));
        }

        let token = Uuid::new_v4().to_string();
        let now = self.clock.now_ms();

        match self
            .store
            .set_if_absent_with_expiry(lock_key, &token, lease)
            .await
        {
            Ok(true) => {
                debug!("Acquired lock '{}' for {:?}", lock_key, lease);
                Ok(Some(LockHandle {
                    key: lock_key.to_string(),
                    token,
                    expires_at: to_datetime(deadline_ms(now, lease)),
                }))
            }
            Ok(false) => {
                debug!("Lock '{}' is held elsewhere", lock_key);
                Ok(None)
            }
            Err(e) => {
                warn!("Lock '{}' not acquired, store failed: {}", lock_key, e);
                Ok(None)
            }
        }
    }

    // == Release ==
    /// Releases `handle` if its token still owns the key.
    ///
    /// `Ok(false)` means the lease had already expired and possibly been
    /// claimed by someone else: the critical section was not exclusive for
    /// its whole duration.
    pub async fn release(&self, handle: LockHandle) -> Result<bool> {
        let removed = self
            .store
            .compare_and_delete(&handle.key, &handle.token)
            .await?;

        if removed {
            debug!("Released lock '{}'", handle.key);
        } else {
            warn!(
                "Lock '{}' was no longer held by this caller at release; the lease expired first",
                handle.key
            );
        }
        Ok(removed)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::coordination::RateLimiter;
    use crate::store::MemoryStore;

    fn lock_with_clock() -> (DistributedLock, MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = MemoryStore::with_clock(100, clock.clone());
        let lock = DistributedLock::with_clock(Arc::new(store.clone()), clock.clone());
        (lock, store, clock)
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (lock, store, _) = lock_with_clock();

        let handle = lock
            .acquire("report", Duration::from_secs(10))
            .await
            .unwrap()
            .expect("lock should be free");
        assert_eq!(handle.key, "report");
        assert_eq!(handle.expires_at.timestamp_millis(), 1_010_000);
        assert_eq!(store.get("report").await.unwrap(), Some(handle.token.clone()));

        assert!(lock.release(handle).await.unwrap());
        assert_eq!(store.get("report").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_second_acquire_is_refused() {
        let (lock, _, _) = lock_with_clock();

        let first = lock.acquire("report", Duration::from_secs(10)).await.unwrap();
        let second = lock.acquire("report", Duration::from_secs(10)).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let (lock, _, _) = lock_with_clock();

        let a = lock.acquire("a", Duration::from_secs(1)).await.unwrap().unwrap();
        let b = lock.acquire("b", Duration::from_secs(1)).await.unwrap().unwrap();
        assert_ne!(a.token, b.token);
    }

    #[tokio::test]
    async fn test_expired_lease_frees_key() {
        let (lock, _, clock) = lock_with_clock();

        let stale = lock.acquire("job", Duration::from_secs(5)).await.unwrap().unwrap();
        clock.advance(Duration::from_secs(5));
        let fresh = lock.acquire("job", Duration::from_secs(5)).await.unwrap();
        assert!(fresh.is_some());

        // The stale holder must not remove the new holder's record
        assert!(!lock.release(stale).await.unwrap());
        assert!(lock.acquire("job", Duration::from_secs(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_with_foreign_token() {
        let (lock, _, _) = lock_with_clock();

        let _held = lock.acquire("job", Duration::from_secs(5)).await.unwrap().unwrap();
        let forged = LockHandle::from_parts("job", "not-the-token");
        assert!(!lock.release(forged).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_outage_is_not_acquired() {
        let (lock, store, _) = lock_with_clock();
        store.set_reachable(false);

        assert!(lock.acquire("job", Duration::from_secs(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_surfaces_store_failure() {
        let (lock, store, _) = lock_with_clock();
        let handle = lock.acquire("job", Duration::from_secs(5)).await.unwrap().unwrap();

        store.set_reachable(false);
        assert!(matches!(lock.release(handle).await, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_huge_lease_saturates() {
        let (lock, _, _) = lock_with_clock();

        let handle = lock
            .acquire("forever", Duration::from_millis(u64::MAX))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(lock
            .acquire("forever", Duration::from_secs(1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_sub_millisecond_lease_still_excludes() {
        let (lock, _, clock) = lock_with_clock();
        let lease = Duration::from_micros(500);

        let first = lock.acquire("j", lease).await.unwrap();
        let second = lock.acquire("j", lease).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        clock.advance(Duration::from_millis(1));
        assert!(lock.acquire("j", lease).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_full_store_keeps_held_lock() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = MemoryStore::with_clock(3, clock.clone());
        let lock = DistributedLock::with_clock(Arc::new(store.clone()), clock.clone());
        let limiter = RateLimiter::with_clock(Arc::new(store.clone()), clock);

        let held = lock.acquire("job", Duration::from_secs(30)).await.unwrap().unwrap();
        for identity in ["u1", "u2", "u3"] {
            limiter.allow(identity, 10, Duration::from_secs(60)).await.unwrap();
        }

        assert!(lock.acquire("job", Duration::from_secs(30)).await.unwrap().is_none());
        assert_eq!(store.get("job").await.unwrap(), Some(held.token));
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let (lock, _, _) = lock_with_clock();

        assert!(matches!(
            lock.acquire("", Duration::from_secs(1)).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            lock.acquire("job", Duration::ZERO).await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
