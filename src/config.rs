//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordination::FailPolicy;

// == Store Backend ==
/// Which key-value store the coordination components talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store; only coordinates callers inside this process
    Memory,
    /// Shared Redis instance
    Redis,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Store backend selection
    pub store_backend: StoreBackend,
    /// Redis connection URL, used when `store_backend` is `Redis`
    pub redis_url: String,
    /// Maximum number of entries the in-memory store can hold
    pub max_entries: usize,
    /// Default TTL in seconds for `PUT /set` without explicit TTL
    pub default_ttl: u64,
    /// Background purge interval in seconds for the in-memory store
    pub cleanup_interval: u64,
    /// Default lock lease in milliseconds
    pub lock_lease_ms: u64,
    /// Requests allowed per client per window
    pub rate_limit_max_requests: u64,
    /// Rate limit window in seconds
    pub rate_limit_window: u64,
    /// Rate limiter behaviour when the store is unreachable
    pub rate_limit_fail_policy: FailPolicy,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `STORE_BACKEND` - `memory` or `redis` (default: memory)
    /// - `REDIS_URL` - Redis URL (default: redis://127.0.0.1:6379)
    /// - `MAX_ENTRIES` - Maximum in-memory entries (default: 10000)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `CLEANUP_INTERVAL` - Purge frequency in seconds (default: 1)
    /// - `LOCK_LEASE_MS` - Default lock lease (default: 30000)
    /// - `RATE_LIMIT_MAX_REQUESTS` - Per-client quota (default: 100)
    /// - `RATE_LIMIT_WINDOW` - Window in seconds (default: 60)
    /// - `RATE_LIMIT_FAIL_POLICY` - `open` or `closed` (default: open)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: env_or("SERVER_PORT", defaults.server_port),
            store_backend: env_or("STORE_BACKEND", defaults.store_backend),
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            default_ttl: env_or("DEFAULT_TTL", defaults.default_ttl),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            lock_lease_ms: env_or("LOCK_LEASE_MS", defaults.lock_lease_ms),
            rate_limit_max_requests: env_or(
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            ),
            rate_limit_window: env_or("RATE_LIMIT_WINDOW", defaults.rate_limit_window),
            rate_limit_fail_policy: env_or(
                "RATE_LIMIT_FAIL_POLICY",
                defaults.rate_limit_fail_policy,
            ),
        }
    }

    /// Default lock lease as a Duration.
    pub fn lock_lease(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ms)
    }

    /// Rate limit window as a Duration.
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            store_backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_entries: 10_000,
            default_ttl: 300,
            cleanup_interval: 1,
            lock_lease_ms: 30_000,
            rate_limit_max_requests: 100,
            rate_limit_window: 60,
            rate_limit_fail_policy: FailPolicy::Open,
        }
    }
}

/// Parses an environment variable, falling back to `default` when unset or invalid.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.default_ttl, 300);
        assert_eq!(config.cleanup_interval, 1);
        assert_eq!(config.lock_lease(), Duration::from_secs(30));
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
        assert_eq!(config.rate_limit_fail_policy, FailPolicy::Open);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        for name in [
            "SERVER_PORT",
            "STORE_BACKEND",
            "MAX_ENTRIES",
            "RATE_LIMIT_FAIL_POLICY",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.rate_limit_fail_policy, FailPolicy::Open);
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("Redis".parse::<StoreBackend>(), Ok(StoreBackend::Redis));
        assert_eq!("memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert!("etcd".parse::<StoreBackend>().is_err());
    }
}
