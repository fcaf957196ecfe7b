//! kv_guard - Coordination primitives over a shared key-value store
//!
//! Cache-aside reads with background refresh, fixed-window rate limiting and
//! lease-based distributed locks, all built on the same small store capability
//! set. Ships with an in-memory backend and a Redis backend, plus an HTTP
//! service exposing the primitives.

pub mod api;
pub mod clock;
pub mod config;
pub mod coordination;
pub mod error;
pub mod models;
pub mod store;
pub mod tasks;

pub use api::AppState;
pub use config::{Config, StoreBackend};
pub use coordination::{CacheAside, DistributedLock, FailPolicy, RateLimiter};
pub use error::{Error, Result, StoreError};
pub use store::{KeyValueStore, MemoryStore, RedisStore};
pub use tasks::spawn_cleanup_task;
