//! Request DTOs for the coordination server API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

use crate::store::MAX_KEY_LENGTH;

/// Request body for the SET operation (PUT /set)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The store key
    pub key: String,
    /// The value to store
    pub value: String,
    /// Optional TTL in seconds
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.key.len() > MAX_KEY_LENGTH {
            return Some(format!(
                "Key exceeds maximum length of {} characters",
                MAX_KEY_LENGTH
            ));
        }
        if self.ttl == Some(0) {
            return Some("TTL must be positive".to_string());
        }
        None
    }
}

/// Request body for POST /locks/:key. The whole body is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AcquireLockRequest {
    /// Lease in milliseconds; the server default applies when absent
    #[serde(default)]
    pub lease_ms: Option<u64>,
}

/// Request body for DELETE /locks/:key
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseLockRequest {
    /// Token returned by the acquire call
    pub token: String,
}

/// Request body for POST /ratelimit/:identity. The whole body is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitRequest {
    /// Requests allowed per window; the server default applies when absent
    #[serde(default)]
    pub limit: Option<u64>,
    /// Window length in seconds; the server default applies when absent
    #[serde(default)]
    pub window_secs: Option<u64>,
}
