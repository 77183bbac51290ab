//! The Entry Model: `{modified, ttl, value}` plus expiry arithmetic.
//!
//! Grounded on the reference codebase's small private `CacheEntry<V>`
//! types in `tier.rs` and `strategy.rs` (`created_at`/`ttl`/`is_expired`),
//! generalized here into the one canonical entry record the rest of the
//! engine operates on.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as monotonic milliseconds since the Unix epoch.
///
/// All `modified` timestamps in the engine are taken from this clock, so
/// expiry comparisons stay self-consistent even if the wall clock is
/// adjusted underneath a long-running process.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A stored cache entry: last-write timestamp, optional TTL, and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<V> {
    /// Monotonic milliseconds timestamp of the last write or touch.
    /// Always strictly positive.
    pub modified: u64,
    /// Time-to-live in milliseconds relative to `modified`. `None` means
    /// the entry never expires.
    pub ttl: Option<u64>,
    /// The stored value.
    pub value: V,
}

impl<V> Entry<V> {
    /// Build a new entry with `modified` set to now.
    pub fn new(value: V, ttl: Option<u64>) -> Self {
        Self {
            modified: now_millis(),
            ttl,
            value,
        }
    }

    /// Whether this entry is expired as of `now`.
    ///
    /// An entry with no TTL is never expired.
    pub fn is_expired_at(&self, now: u64) -> bool {
        match self.ttl {
            Some(ttl) => self.modified.saturating_add(ttl) <= now,
            None => false,
        }
    }

    /// Whether this entry is expired as of the current time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Remaining time-to-live in milliseconds, or `None` if the entry
    /// never expires. Returns `Some(0)` for an entry that is already
    /// expired rather than going negative.
    pub fn remaining_ttl_at(&self, now: u64) -> Option<u64> {
        self.ttl
            .map(|ttl| (self.modified.saturating_add(ttl)).saturating_sub(now))
    }

    /// Reset `modified` to now, without touching the TTL. Implements the
    /// `touch`/`refresh` family.
    pub fn touch(&mut self) {
        self.modified = now_millis();
    }

    /// Clear the TTL, making the entry eternal. Implements `persist`.
    pub fn persist(&mut self) {
        self.ttl = None;
    }

    /// Replace the TTL outright. Implements `expire`/`expire_at`.
    pub fn set_ttl(&mut self, ttl: Option<u64>) {
        self.ttl = ttl;
    }
}
