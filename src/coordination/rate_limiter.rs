//! Rate Limiter
//!
//! Fixed-window request quota per identity on a shared [`KeyValueStore`].
//!
//! Each identity has one counter key (`ratelimit:<identity>`). The first
//! request of a window creates the counter and starts its expiry; every
//! request in the same window shares that counter until the store drops it.
//! The increment and the expiry are one store operation
//! (`increment_with_expiry`), so a crash can't leave a counter without reset.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{deadline_ms, to_datetime, Clock, SystemClock};
use crate::error::{Error, Result};
use crate::store::{KeyValueStore, MAX_KEY_LENGTH};

/// Prefix of counter keys in the store.
pub const RATE_LIMIT_KEY_PREFIX: &str = "ratelimit:";

// == Fail Policy ==
/// What `allow` answers when the store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailPolicy {
    /// Let traffic through
    #[default]
    Open,
    /// Reject traffic
    Closed,
}

impl FromStr for FailPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(FailPolicy::Open),
            "closed" => Ok(FailPolicy::Closed),
            other => Err(format!("unknown fail policy '{}'", other)),
        }
    }
}

// == Rate Decision ==
/// Outcome of one `allow` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Post-increment counter (0 when the store was unreachable)
    pub current: u64,
    /// Requests left in this window
    pub remaining: u64,
    /// Configured quota
    pub limit: u64,
    /// When the current window ends
    pub reset_at: DateTime<Utc>,
    /// True when the decision came from the fail policy, not the store
    pub degraded: bool,
}

// == Rate Limiter ==
/// Fixed-window limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    fail_policy: FailPolicy,
}

impl RateLimiter {
    /// Creates a fail-open limiter on the system clock.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            fail_policy: FailPolicy::default(),
        }
    }

    /// Sets the store-outage policy.
    pub fn with_fail_policy(mut self, fail_policy: FailPolicy) -> Self {
        self.fail_policy = fail_policy;
        self
    }

    pub fn fail_policy(&self) -> FailPolicy {
        self.fail_policy
    }

    // == Allow ==
    /// Counts one request for `identity` and decides whether it fits in
    /// `limit` requests per `window`.
    pub async fn allow(&self, identity: &str, limit: u64, window: Duration) -> Result<RateDecision> {
        if identity.is_empty() {
            return Err(Error::InvalidArgument("Identity cannot be empty".to_string()));
        }
        if limit == 0 {
            return Err(Error::InvalidArgument("Limit must be positive".to_string()));
        }
        if window.is_zero() {
            return Err(Error::InvalidArgument("Window must be positive".to_string()));
        }

        let key = format!("{}{}", RATE_LIMIT_KEY_PREFIX, identity);
        if key.len() > MAX_KEY_LENGTH {
            return Err(Error::InvalidArgument(format!(
                "Identity exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH - RATE_LIMIT_KEY_PREFIX.len()
            )));
        }
        let now = self.clock.now_ms();

        match self.store.increment_with_expiry(&key, window).await {
            Ok(counted) => {
                let allowed = counted.count <= limit;
                if !allowed {
                    debug!(
                        "Rate limit exceeded for '{}': {}/{}",
                        identity, counted.count, limit
                    );
                }
                Ok(RateDecision {
                    allowed,
                    current: counted.count,
                    remaining: limit.saturating_sub(counted.count),
                    limit,
                    reset_at: to_datetime(deadline_ms(now, counted.ttl)),
                    degraded: false,
                })
            }
            Err(e) => {
                let allowed = self.fail_policy == FailPolicy::Open;
                warn!(
                    "Rate limiter store unavailable ({}), failing {} for '{}'",
                    e,
                    if allowed { "open" } else { "closed" },
                    identity
                );
                Ok(RateDecision {
                    allowed,
                    current: 0,
                    remaining: if allowed { limit } else { 0 },
                    limit,
                    reset_at: to_datetime(deadline_ms(now, window)),
                    degraded: true,
                })
            }
        }
    }

    /// Drops the counter for `identity`, starting a fresh window on the next request.
    pub async fn reset(&self, identity: &str) -> Result<bool> {
        let key = format!("{}{}", RATE_LIMIT_KEY_PREFIX, identity);
        Ok(self.store.delete(&key).await?)
    }
}
