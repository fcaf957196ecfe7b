//! Store Entry Module
//!
//! Defines the structure for individual stored values with TTL support.

// == Store Entry ==
/// Represents a single stored value with expiry metadata.
///
/// Times are Unix milliseconds read from the store's clock, never from the
/// wall clock directly, so expiry follows whatever clock the store was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    /// The stored value
    pub value: String,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl StoreEntry {
    // == Constructor ==
    /// Creates a new entry at `now_ms` with an optional TTL in milliseconds.
    pub fn new(value: String, now_ms: u64, ttl_ms: Option<u64>) -> Self {
        Self {
            value,
            created_at: now_ms,
            expires_at: ttl_ms.map(|ttl| now_ms.saturating_add(ttl)),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now_ms`.
    ///
    /// Boundary condition: an entry is expired once `now_ms >= expires_at`, so
    /// a fully elapsed TTL is never visible.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(0)` if the entry has expired (TTL elapsed)
    /// - `Some(remaining_ms)` if the entry has TTL and hasn't expired
    /// - `None` if the entry has no TTL (never expires)
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(now_ms))
    }

    /// Replaces the expiry with `now_ms + ttl_ms`.
    pub fn set_ttl(&mut self, now_ms: u64, ttl_ms: u64) {
        self.expires_at = Some(now_ms.saturating_add(ttl_ms));
    }
}
