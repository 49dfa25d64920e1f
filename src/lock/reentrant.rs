//! Reentrant distributed lock with release notifications
//!
//! The lock record is a hash keyed by the lock name with one field per holder
//! token storing a reentrancy count. Acquire and release are each one atomic
//! store-side operation; a failed acquire reports the current holder's
//! remaining lease so the caller can wait for it instead of busy-polling.
//! When the count reaches zero the record is deleted and a notification is
//! published on a channel derived from the lock name, waking any waiter
//! blocked in [`ReentrantLock::try_lock_wait`].
//!
//! With the watchdog enabled the lease is renewed at a third of its duration
//! for as long as this instance holds the lock, so a long critical section
//! does not silently lose mutual exclusion. Without it, the lease must
//! exceed the worst-case critical-section duration by a safety margin.

use super::token::holder_token;
use super::{DistributedLock, LOCK_KEY_PREFIX};
use crate::store::{KeyValueStore, ReleaseOutcome, StoreError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lease applied when a caller never specified one
const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Reentrant lease lock
///
/// One instance represents one logical holder. Nested `try_lock` calls by the
/// same instance stack and require a matching number of `unlock` calls.
pub struct ReentrantLock {
    store: Arc<dyn KeyValueStore>,
    key: String,
    channel: String,
    token: String,
    auto_extend: bool,

    /// Lease of the most recent successful acquire, reused on release
    lease: Mutex<Duration>,

    /// Renewal task, present only while the lock is held with the watchdog on
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl ReentrantLock {
    /// Create a lock handle for the named resource
    pub fn new(store: Arc<dyn KeyValueStore>, name: &str) -> Self {
        let key = format!("{}{}", LOCK_KEY_PREFIX, name);
        ReentrantLock {
            channel: release_channel(&key),
            store,
            key,
            token: holder_token(),
            auto_extend: false,
            lease: Mutex::new(DEFAULT_LEASE),
            watchdog: Mutex::new(None),
        }
    }

    /// Enable automatic lease renewal while the lock is held
    pub fn with_watchdog(mut self) -> Self {
        self.auto_extend = true;
        self
    }

    /// Try to acquire, reporting the current holder's remaining lease on failure
    ///
    /// `Ok(None)` means the lock is now held (or re-entered) by this
    /// instance; `Ok(Some(remaining))` means another holder has it for at
    /// most that long.
    pub async fn try_lock_remaining(
        &self,
        ttl: Duration,
    ) -> Result<Option<Duration>, StoreError> {
        match self
            .store
            .acquire_reentrant(&self.key, &self.token, ttl)
            .await?
        {
            None => {
                debug!(key = %self.key, "reentrant lock acquired");
                if let Ok(mut lease) = self.lease.lock() {
                    *lease = ttl;
                }
                if self.auto_extend {
                    self.start_watchdog(ttl);
                }
                Ok(None)
            }
            Some(remaining) => Ok(Some(remaining)),
        }
    }

    /// Acquire, waiting up to `wait` for the current holder to release
    ///
    /// Blocks on the release channel rather than polling; each notification
    /// or lease expiry triggers another acquire attempt until the overall
    /// deadline passes.
    pub async fn try_lock_wait(&self, wait: Duration, ttl: Duration) -> Result<bool, StoreError> {
        let deadline = Instant::now() + wait;
        // Subscribe before the first attempt so a release between the failed
        // attempt and the wait is not missed
        let mut releases = self.store.subscribe(&self.channel).await?;

        loop {
            let remaining = match self.try_lock_remaining(ttl).await? {
                None => return Ok(true),
                Some(remaining) => remaining,
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let mut budget = deadline - now;
            if remaining > Duration::ZERO {
                // The holder's lease caps how long a notification can take
                budget = budget.min(remaining);
            }

            match tokio::time::timeout(budget, releases.recv()).await {
                Ok(Ok(_)) | Err(_) => continue,
                Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Err(RecvError::Closed)) => {
                    // Channel gone (store shutting down?); degrade to a paced retry
                    tokio::time::sleep(budget.min(Duration::from_millis(50))).await;
                }
            }
        }
    }

    fn current_lease(&self) -> Duration {
        self.lease
            .lock()
            .map(|lease| *lease)
            .unwrap_or(DEFAULT_LEASE)
    }

    fn start_watchdog(&self, ttl: Duration) {
        let mut slot = match self.watchdog.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_some() {
            return;
        }
        let store = self.store.clone();
        let key = self.key.clone();
        let token = self.token.clone();
        let interval = (ttl / 3).max(Duration::from_millis(10));
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match store.refresh_if_holder(&key, &token, ttl).await {
                    Ok(true) => debug!(key = %key, "lease renewed"),
                    // Lock released or lost; nothing left to renew
                    Ok(false) => break,
                    Err(e) => {
                        warn!(key = %key, error = %e, "lease renewal failed");
                        break;
                    }
                }
            }
        }));
    }

    fn stop_watchdog(&self) {
        let handle = match self.watchdog.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[async_trait]
impl DistributedLock for ReentrantLock {
    async fn try_lock(&self, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self.try_lock_remaining(ttl).await?.is_none())
    }

    async fn unlock(&self) -> Result<(), StoreError> {
        let lease = self.current_lease();
        let outcome = self
            .store
            .release_reentrant(&self.key, &self.token, lease, &self.channel)
            .await?;
        match outcome {
            ReleaseOutcome::Released => {
                debug!(key = %self.key, "reentrant lock released");
                self.stop_watchdog();
            }
            ReleaseOutcome::StillHeld => {
                debug!(key = %self.key, "reentrant lock count decremented");
            }
            ReleaseOutcome::NotHolder => {
                warn!(key = %self.key, "unlock by non-holder ignored");
                self.stop_watchdog();
            }
        }
        Ok(())
    }
}

impl Drop for ReentrantLock {
    fn drop(&mut self) {
        self.stop_watchdog();
    }
}

/// Channel waiters listen on for the release of a lock key
pub fn release_channel(lock_key: &str) -> String {
    format!("{}:released", lock_key)
}
