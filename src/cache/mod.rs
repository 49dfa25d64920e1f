//! Cache-aside client
//!
//! Generic read-through caching over the key-value store with three
//! mutually exclusive strategies against penetration and breakdown:
//!
//! - [`CacheClient::read_pass_through`] caches a short-lived empty sentinel
//!   for ids absent from the source of truth, so repeated lookups of a
//!   nonexistent id stop reaching the fallback.
//! - [`CacheClient::read_with_mutex`] lets exactly one caller rebuild an
//!   expired hot key while concurrent readers wait and retry.
//! - [`CacheClient::read_with_logical_expiry`] never blocks readers: stale
//!   values are served immediately while a bounded background pool rebuilds
//!   the entry. Requires pre-warming via
//!   [`CacheClient::write_with_logical_expiry`].
//!
//! The source of truth is only ever reached through the caller-supplied
//! fallback function.

mod client;
mod envelope;

pub use client::{CacheClient, CacheConfig};
pub use envelope::Envelope;

use crate::store::StoreError;
use std::fmt;

/// Errors reported by the cache client
#[derive(Debug)]
pub enum CacheError {
    /// The key-value store failed; retryable
    Store(StoreError),

    /// A cached payload could not be encoded or decoded
    Serialization(serde_json::Error),

    /// The caller-supplied fallback failed
    Fallback(anyhow::Error),

    /// The rebuild lock stayed contended past the retry budget
    RebuildContended { key: String },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Store(e) => write!(f, "store failure: {}", e),
            CacheError::Serialization(e) => write!(f, "serialization failure: {}", e),
            CacheError::Fallback(e) => write!(f, "fallback failure: {}", e),
            CacheError::RebuildContended { key } => {
                write!(f, "rebuild of '{}' still contended after retries", key)
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Store(e) => Some(e),
            CacheError::Serialization(e) => Some(e),
            CacheError::Fallback(e) => Some(e.as_ref()),
            CacheError::RebuildContended { .. } => None,
        }
    }
}

impl From<StoreError> for CacheError {
    fn from(e: StoreError) -> Self {
        CacheError::Store(e)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e)
    }
}
