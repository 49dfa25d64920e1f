//! Entry structure for key-value pairs

use super::value::Value;
use std::time::{Duration, Instant};

/// Represents a single entry in the store
#[derive(Debug, Clone)]
pub struct Entry {
    /// The value
    pub value: Value,

    /// Optional expiration time (absolute)
    pub expire_at: Option<Instant>,
}

impl Entry {
    /// Create a new entry without expiration
    pub fn new(value: Value) -> Self {
        Entry {
            value,
            expire_at: None,
        }
    }

    /// Create a new entry with expiration
    pub fn with_expiration(value: Value, ttl: Duration) -> Self {
        Entry {
            value,
            expire_at: Some(Instant::now() + ttl),
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        if let Some(expire_at) = self.expire_at {
            Instant::now() >= expire_at
        } else {
            false
        }
    }

    /// Set expiration time
    pub fn set_expiration(&mut self, ttl: Duration) {
        self.expire_at = Some(Instant::now() + ttl);
    }

    /// Get remaining TTL, None if the entry has no expiration
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expire_at
            .map(|expire_at| expire_at.saturating_duration_since(Instant::now()))
    }
}
