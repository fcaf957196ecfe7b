//! Response DTOs for the coordination server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::coordination::LockHandle;
use crate::store::StoreStats;

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub value: String,
}

impl GetResponse {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Response body for the SET operation (PUT /set)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for a granted lock (POST /locks/:key)
#[derive(Debug, Clone, Serialize)]
pub struct LockResponse {
    pub key: String,
    /// Token to present on release
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<LockHandle> for LockResponse {
    fn from(handle: LockHandle) -> Self {
        Self {
            key: handle.key,
            token: handle.token,
            expires_at: handle.expires_at,
        }
    }
}

/// Response body for a release (DELETE /locks/:key)
///
/// `released: false` means the lease had already expired; the holder's
/// critical section overran it.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseResponse {
    pub key: String,
    pub released: bool,
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Active store backend ("memory" or "redis")
    pub backend: String,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub total_entries: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl StatsResponse {
    pub fn new(backend: impl Into<String>, stats: &StoreStats) -> Self {
        Self {
            backend: backend.into(),
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            expirations: stats.expirations,
            total_entries: stats.total_entries,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy", or "degraded" when the store is unreachable
    pub status: String,
    /// Whether the store answered the health check read
    pub store_reachable: bool,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(store_reachable: bool) -> Self {
        Self {
            status: if store_reachable { "healthy" } else { "degraded" }.to_string(),
            store_reachable,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_response_serialize() {
        let resp = SetResponse::new("my_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("my_key"));
        assert!(json.contains("successfully"));
    }

    #[test]
    fn test_lock_response_from_handle() {
        let handle = LockHandle::from_parts("jobs", "abc");
        let resp = LockResponse::from(handle);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["key"], "jobs");
        assert_eq!(json["token"], "abc");
        assert!(json["expires_at"].is_string());
    }

    #[test]
    fn test_stats_response_hit_rate() {
        let stats = StoreStats {
            hits: 80,
            misses: 20,
            evictions: 5,
            expirations: 1,
            total_entries: 100,
        };
        let resp = StatsResponse::new("memory", &stats);
        assert!((resp.hit_rate - 0.8).abs() < 0.001);
        assert_eq!(resp.backend, "memory");
    }

    #[test]
    fn test_health_response_status() {
        assert_eq!(HealthResponse::new(true).status, "healthy");
        assert_eq!(HealthResponse::new(false).status, "degraded");
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = ErrorResponse::new("Something went wrong");
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"error":"Something went wrong"}"#);
    }
}
