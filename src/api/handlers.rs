//! API Handlers
//!
//! HTTP request handlers for each coordination server endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StoreBackend};
use crate::coordination::{DistributedLock, LockHandle, RateDecision, RateLimiter};
use crate::error::{Error, Result};
use crate::models::{
    AcquireLockRequest, DeleteResponse, GetResponse, HealthResponse, LockResponse,
    RateLimitRequest, ReleaseLockRequest, ReleaseResponse, SetRequest, SetResponse,
    StatsResponse,
};
use crate::store::{KeyValueStore, MemoryStore};

/// Key read by the health check; never written.
const HEALTH_CHECK_KEY: &str = "health:check";

/// Namespace of keys written through `/set`.
pub const RAW_KEY_PREFIX: &str = "kv:";

/// Namespace of locks taken through `/locks/:key`.
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Namespace of identities counted through `/ratelimit/:identity`.
pub const API_IDENTITY_PREFIX: &str = "api:";

fn namespaced(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

/// Application state shared across all handlers.
///
/// Every component talks to the same store; nothing else is shared.
#[derive(Clone)]
pub struct AppState {
    /// Shared key-value store
    pub store: Arc<dyn KeyValueStore>,
    /// Request quota enforcement
    pub limiter: RateLimiter,
    /// Named leases
    pub locks: DistributedLock,
    /// Defaults for requests that omit them
    pub config: Arc<Config>,
    /// Time source shared with the limiter and locks
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wires the coordination components onto `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Same as [`AppState::new`] with an explicit time source.
    pub fn with_clock(
        store: Arc<dyn KeyValueStore>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limiter: RateLimiter::with_clock(store.clone(), clock.clone())
                .with_fail_policy(config.rate_limit_fail_policy),
            locks: DistributedLock::with_clock(store.clone(), clock.clone()),
            store,
            config: Arc::new(config.clone()),
            clock,
        }
    }

    /// Creates state over a fresh in-memory store sized from `config`.
    pub fn in_memory(config: &Config) -> (Self, MemoryStore) {
        let store = MemoryStore::new(config.max_entries);
        (Self::new(Arc::new(store.clone()), config), store)
    }
}

/// Handler for PUT /set
///
/// Stores a key-value pair with the given or default TTL. Keys live in the
/// `kv:` namespace, apart from lock records and counters.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(Error::InvalidArgument(error_msg));
    }

    let ttl = Duration::from_secs(req.ttl.unwrap_or(state.config.default_ttl));
    state
        .store
        .set_with_expiry(&namespaced(RAW_KEY_PREFIX, &req.key), &req.value, ttl)
        .await?;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.store.get(&namespaced(RAW_KEY_PREFIX, &key)).await? {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(Error::NotFound(key)),
    }
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if state.store.delete(&namespaced(RAW_KEY_PREFIX, &key)).await? {
        Ok(Json(DeleteResponse::new(key)))
    } else {
        Err(Error::NotFound(key))
    }
}

/// Handler for POST /locks/:key
///
/// Grants the lock or answers 409 Conflict; never waits.
pub async fn acquire_lock_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<AcquireLockRequest>>,
) -> Result<Json<LockResponse>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let lease = req
        .lease_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.config.lock_lease());

    match state
        .locks
        .acquire(&namespaced(LOCK_KEY_PREFIX, &key), lease)
        .await?
    {
        Some(handle) => Ok(Json(LockResponse {
            key,
            ..LockResponse::from(handle)
        })),
        None => Err(Error::LockNotAcquired(key)),
    }
}

/// Handler for DELETE /locks/:key
///
/// `released: false` tells the holder its lease ran out before it released.
pub async fn release_lock_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<ReleaseLockRequest>,
) -> Result<Json<ReleaseResponse>> {
    let released = state
        .locks
        .release(LockHandle::from_parts(
            namespaced(LOCK_KEY_PREFIX, &key),
            req.token,
        ))
        .await?;

    Ok(Json(ReleaseResponse { key, released }))
}

/// Handler for POST /ratelimit/:identity
///
/// Counts one request for `identity` and returns the decision.
pub async fn rate_limit_handler(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    body: Option<Json<RateLimitRequest>>,
) -> Result<Json<RateDecision>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let limit = req.limit.unwrap_or(state.config.rate_limit_max_requests);
    let window = req
        .window_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.config.rate_limit_window());

    let decision = state
        .limiter
        .allow(&namespaced(API_IDENTITY_PREFIX, &identity), limit, window)
        .await?;
    Ok(Json(decision))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let stats = state.store.stats().await?;
    let backend = match state.config.store_backend {
        StoreBackend::Memory => "memory",
        StoreBackend::Redis => "redis",
    };

    Ok(Json(StatsResponse::new(backend, &stats)))
}

/// Handler for GET /health
///
/// Reports "degraded" rather than failing when the store does not answer.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = state.store.ttl_remaining(HEALTH_CHECK_KEY).await.is_ok();
    Json(HealthResponse::new(reachable))
}
