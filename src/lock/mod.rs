//! Distributed mutual-exclusion locks
//!
//! Lease-based locks backed by the key-value store, usable across process
//! instances. Two variants: [`SimpleLock`], a minimal non-reentrant lock, and
//! [`ReentrantLock`], which supports nested acquisition, waiting on a release
//! notification and automatic lease renewal.
//!
//! Both are leases: a holder that crashes or hangs loses the lock once the
//! TTL elapses, and business code still running past the lease has lost
//! mutual exclusion. Pick a TTL well above the worst-case critical-section
//! duration, or use the reentrant lock's watchdog to renew it while the
//! critical section runs.

mod reentrant;
mod simple;
mod token;

pub use reentrant::ReentrantLock;
pub use simple::SimpleLock;
pub use token::holder_token;

use crate::store::StoreError;
use async_trait::async_trait;
use std::time::Duration;

/// Key prefix shared by every lock record
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// A named distributed mutual-exclusion lock
///
/// One instance represents one logical holder; nested acquisition through the
/// same instance is reentrant where the implementation supports it.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to acquire the lock with the given lease, without waiting
    ///
    /// Returns true if the lock is now held by this instance.
    async fn try_lock(&self, ttl: Duration) -> Result<bool, StoreError>;

    /// Release the lock
    ///
    /// Calling this without holding the lock (or after losing it to lease
    /// expiry) must leave another holder's lock untouched.
    async fn unlock(&self) -> Result<(), StoreError>;
}
