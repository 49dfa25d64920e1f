//! Key-value store adapter
//!
//! Defines the narrow interface the cache, lock and id components use to talk
//! to a Redis-style remote store, plus an in-memory implementation that keeps
//! the same atomicity guarantees behind a single mutex. The multi-step
//! operations (`delete_if_equals`, `acquire_reentrant`, `release_reentrant`,
//! `refresh_if_holder`) each correspond to one server-side script on a real
//! deployment and must execute atomically.

mod entry;
mod memory;
mod value;

pub use entry::Entry;
pub use memory::InMemoryStore;
pub use value::Value;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;

/// Errors reported by a [`KeyValueStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store could not be reached; the caller may retry
    Unreachable(String),

    /// Operation against a key holding the wrong kind of value
    WrongType { key: String, kind: &'static str },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unreachable(msg) => write!(f, "store unreachable: {}", msg),
            StoreError::WrongType { key, kind } => {
                write!(f, "wrong value type for key '{}' (holds {})", key, kind)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Outcome of releasing one level of a reentrant lock record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The caller's token is not present in the record; nothing was changed
    NotHolder,

    /// The count was decremented but the caller still holds the lock
    StillHeld,

    /// The count reached zero; the record was deleted and waiters notified
    Released,
}

/// Interface over a remote string/hash key-value store
///
/// Every method is a remote call that may fail with
/// [`StoreError::Unreachable`]. Implementations must make each method atomic
/// with respect to concurrent callers, the way a single-threaded server or a
/// scripted operation would be.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Get a value by key, `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Set a key, with an optional physical TTL
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Set a key only if it does not already exist, with a TTL
    ///
    /// Returns true if the key was set (it was absent).
    async fn set_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Delete a key, returns true if the key existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically increment a counter, creating it at 0 first if absent
    ///
    /// Returns the value after the increment.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Remaining physical TTL of a key, `None` if absent or non-expiring
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Publish a message on a named channel, returns the receiver count
    async fn publish(&self, channel: &str, message: Bytes) -> Result<usize, StoreError>;

    /// Subscribe to a named channel
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Bytes>, StoreError>;

    /// Atomically delete `key` only if its current value equals `expected`
    ///
    /// Returns true if the key was deleted. This is the unlock primitive of
    /// the simple lock: the check and the delete must not be interleaved with
    /// another client's acquire.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError>;

    /// Atomically acquire or re-enter a reentrant lock record
    ///
    /// If the record is absent, it is created with `token -> 1` and the TTL.
    /// If the record already contains `token`, the count is incremented and
    /// the TTL refreshed. Both cases return `Ok(None)`. If the record is held
    /// under a different token, returns `Ok(Some(remaining_ttl))` and changes
    /// nothing.
    async fn acquire_reentrant(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<Option<Duration>, StoreError>;

    /// Atomically release one level of a reentrant lock record
    ///
    /// Decrements the count for `token`. A count still positive refreshes the
    /// TTL; a count reaching zero deletes the record and publishes a release
    /// message on `channel`. A token absent from the record is a no-op.
    async fn release_reentrant(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
        channel: &str,
    ) -> Result<ReleaseOutcome, StoreError>;

    /// Refresh the TTL of a lock record if `token` currently holds it
    ///
    /// Returns true if the holder was present and the lease renewed.
    async fn refresh_if_holder(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;
}
