//! Coordination Module
//!
//! The three components that sit in front of the shared store. Each one is
//! handed an `Arc<dyn KeyValueStore>`; none keeps shared state in process
//! memory, so instances in different processes pointed at the same store
//! coordinate with each other.
//!
//! - [`CacheAside`] - cached reads with background refresh
//! - [`RateLimiter`] - fixed-window request quotas
//! - [`DistributedLock`] - lease-based mutual exclusion

mod cache_aside;
mod lock;
mod rate_limiter;


pub use cache_aside::{
    CacheAside, Fetched, Origin, RefreshHandle, RefreshOutcome, DEFAULT_REFRESH_RATIO,
    REFRESH_LOCK_PREFIX,
};
pub use lock::{DistributedLock, LockHandle};
pub use rate_limiter::{FailPolicy, RateDecision, RateLimiter, RATE_LIMIT_KEY_PREFIX};
