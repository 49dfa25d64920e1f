//! Logical-expiry envelope
//!
//! The logical-expiration strategy stores values wrapped with an explicit
//! expiry timestamp and no physical TTL, so the key never vanishes from the
//! store and readers can always serve the last known value while a rebuild
//! runs in the background.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached payload plus the instant it becomes stale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Moment the payload stops being fresh
    pub expire_at: DateTime<Utc>,

    /// The cached payload
    pub data: T,
}

impl<T> Envelope<T> {
    /// Wrap a value, fresh for `logical_ttl` from now
    pub fn new(data: T, logical_ttl: Duration) -> Self {
        Envelope {
            expire_at: Utc::now() + logical_ttl,
            data,
        }
    }

    /// Whether the payload is still fresh
    pub fn is_fresh(&self) -> bool {
        Utc::now() < self.expire_at
    }
}
