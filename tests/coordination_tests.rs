//! Integration Tests for the Coordination Primitives
//!
//! Exercises the cache, limiter and lock together on one shared store, the
//! way separate service instances would see it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kv_guard::clock::ManualClock;
use kv_guard::coordination::{Origin, RefreshOutcome};
use kv_guard::{CacheAside, DistributedLock, FailPolicy, KeyValueStore, MemoryStore, RateLimiter};
use tokio::sync::oneshot;

// == Helper Functions ==

struct Shared {
    store: MemoryStore,
    clock: Arc<ManualClock>,
}

impl Shared {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(5_000_000));
        let store = MemoryStore::with_clock(1_000, clock.clone());
        Self { store, clock }
    }

    fn handle(&self) -> Arc<dyn KeyValueStore> {
        Arc::new(self.store.clone())
    }

    fn cache(&self) -> CacheAside {
        CacheAside::with_clock(self.handle(), self.clock.clone())
    }

    fn limiter(&self) -> RateLimiter {
        RateLimiter::with_clock(self.handle(), self.clock.clone())
    }

    fn lock(&self) -> DistributedLock {
        DistributedLock::with_clock(self.handle(), self.clock.clone())
    }
}

// == Cache Aside ==

#[tokio::test]
async fn test_cache_computes_once_within_ttl() {
    let shared = Shared::new();
    let cache = shared.cache().with_refresh_ratio(0.0);
    let calls = Arc::new(AtomicU64::new(0));

    for _ in 0..5 {
        let calls = calls.clone();
        let fetched = cache
            .get_or_compute("profile:7", Duration::from_secs(30), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(vec![7, 7, 7])
            })
            .await
            .unwrap();
        assert_eq!(fetched.value, vec![7, 7, 7]);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cache_staleness_is_bounded_by_ttl() {
    let shared = Shared::new();
    let cache = shared.cache().with_refresh_ratio(0.0);
    let ttl = Duration::from_secs(10);
    let source = Arc::new(AtomicU64::new(1));

    let read = |cache: CacheAside, source: Arc<AtomicU64>| async move {
        cache
            .get_or_compute("price", ttl, move || async move {
                Ok::<_, anyhow::Error>(source.load(Ordering::SeqCst))
            })
            .await
            .unwrap()
            .value
    };

    assert_eq!(read(cache.clone(), source.clone()).await, 1);
    source.store(2, Ordering::SeqCst);

    shared.clock.advance(Duration::from_secs(9));
    assert_eq!(read(cache.clone(), source.clone()).await, 1);

    shared.clock.advance(Duration::from_secs(1));
    assert_eq!(read(cache, source).await, 2);
}

#[tokio::test]
async fn test_refresh_does_not_block_reader() {
    let shared = Shared::new();
    let cache = shared.cache();
    let ttl = Duration::from_secs(10);

    cache
        .get_or_compute("feed", ttl, || async { Ok::<_, anyhow::Error>("old".to_string()) })
        .await
        .unwrap();
    shared.clock.advance(Duration::from_secs(6));

    let (release, gate) = oneshot::channel::<()>();
    let fetched = cache
        .get_or_compute("feed", ttl, move || async move {
            gate.await.ok();
            Ok::<_, anyhow::Error>("new".to_string())
        })
        .await
        .unwrap();

    // Served while the refresh is still parked on the gate
    assert_eq!(fetched.value, "old");
    assert_eq!(fetched.origin, Origin::Cached);

    release.send(()).unwrap();
    let outcome = fetched.refresh.expect("refresh scheduled").outcome().await;
    assert_eq!(outcome, RefreshOutcome::Refreshed);

    let after = cache
        .get_or_compute("feed", ttl, || async { Ok::<_, anyhow::Error>("unused".to_string()) })
        .await
        .unwrap();
    assert_eq!(after.value, "new");
}

#[tokio::test]
async fn test_cache_degrades_during_outage() {
    let shared = Shared::new();
    let cache = shared.cache();
    shared.store.set_reachable(false);

    let fetched = cache
        .get_or_compute("k", Duration::from_secs(5), || async { Ok::<_, anyhow::Error>(42u32) })
        .await
        .unwrap();

    assert_eq!(fetched.value, 42);
    assert!(fetched.is_uncached());
}

// == Rate Limiter ==

#[tokio::test]
async fn test_rate_limit_shared_between_instances() {
    let shared = Shared::new();
    let instance_a = shared.limiter();
    let instance_b = shared.limiter();
    let window = Duration::from_secs(60);

    let mut allowed = Vec::new();
    for i in 0..4 {
        let limiter = if i % 2 == 0 { &instance_a } else { &instance_b };
        allowed.push(limiter.allow("tenant", 3, window).await.unwrap().allowed);
    }

    assert_eq!(allowed, vec![true, true, true, false]);
}

#[tokio::test]
async fn test_rate_limit_window_resets() {
    let shared = Shared::new();
    let limiter = shared.limiter();
    let window = Duration::from_secs(60);

    for _ in 0..3 {
        limiter.allow("tenant", 3, window).await.unwrap();
    }
    assert!(!limiter.allow("tenant", 3, window).await.unwrap().allowed);

    shared.clock.advance(window);
    let decision = limiter.allow("tenant", 3, window).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.current, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_exceed_limit() {
    let shared = Shared::new();
    let limit = 10;

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let limiter = shared.limiter();
        tasks.push(tokio::spawn(async move {
            limiter
                .allow("burst", limit, Duration::from_secs(60))
                .await
                .unwrap()
                .allowed
        }));
    }

    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap() {
            granted += 1;
        }
    }
    assert_eq!(granted, limit);
}

#[tokio::test]
async fn test_rate_limit_outage_policies() {
    let shared = Shared::new();
    let open = shared.limiter();
    let closed = shared.limiter().with_fail_policy(FailPolicy::Closed);
    shared.store.set_reachable(false);

    let window = Duration::from_secs(60);
    assert!(open.allow("t", 1, window).await.unwrap().allowed);
    assert!(!closed.allow("t", 1, window).await.unwrap().allowed);
}

// == Distributed Lock ==

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lock_mutual_exclusion() {
    let shared = Shared::new();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let lock = shared.lock();
        tasks.push(tokio::spawn(async move {
            lock.acquire("singleton", Duration::from_secs(30))
                .await
                .unwrap()
        }));
    }

    let mut holders = Vec::new();
    for task in tasks {
        if let Some(handle) = task.await.unwrap() {
            holders.push(handle);
        }
    }
    assert_eq!(holders.len(), 1);
}

#[tokio::test]
async fn test_expired_holder_cannot_release_successor() {
    let shared = Shared::new();
    let worker_a = shared.lock();
    let worker_b = shared.lock();
    let lease = Duration::from_secs(5);

    let stale = worker_a.acquire("job", lease).await.unwrap().unwrap();
    shared.clock.advance(Duration::from_secs(6));
    let current = worker_b.acquire("job", lease).await.unwrap().unwrap();

    assert!(!worker_a.release(stale).await.unwrap());
    assert_eq!(
        shared.store.get("job").await.unwrap(),
        Some(current.token.clone())
    );
    assert!(worker_b.release(current).await.unwrap());
}

#[tokio::test]
async fn test_lock_not_granted_during_outage() {
    let shared = Shared::new();
    let lock = shared.lock();
    shared.store.set_reachable(false);

    assert!(lock
        .acquire("job", Duration::from_secs(5))
        .await
        .unwrap()
        .is_none());
}
