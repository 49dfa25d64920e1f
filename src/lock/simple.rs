//! Minimal non-reentrant distributed lock
//!
//! Acquisition is a single conditional set; release is a single atomic
//! check-and-delete. Release must never be a read followed by a delete: a
//! holder whose lease expired under load would read its own stale token,
//! block, and then delete a lock that a different holder has since acquired.

use super::token::holder_token;
use super::{DistributedLock, LOCK_KEY_PREFIX};
use crate::store::{KeyValueStore, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Non-reentrant lease lock over a `setIfAbsent` key
///
/// One instance per logical holder; a second `try_lock` on an instance that
/// already holds the lock fails rather than re-entering.
pub struct SimpleLock {
    store: Arc<dyn KeyValueStore>,
    key: String,
    token: String,
}

impl SimpleLock {
    /// Create a lock handle for the named resource
    pub fn new(store: Arc<dyn KeyValueStore>, name: &str) -> Self {
        SimpleLock {
            store,
            key: format!("{}{}", LOCK_KEY_PREFIX, name),
            token: holder_token(),
        }
    }

    /// The store key guarding the resource
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl DistributedLock for SimpleLock {
    async fn try_lock(&self, ttl: Duration) -> Result<bool, StoreError> {
        let acquired = self
            .store
            .set_if_absent(&self.key, Bytes::from(self.token.clone()), ttl)
            .await?;
        debug!(key = %self.key, acquired, "simple lock attempt");
        Ok(acquired)
    }

    async fn unlock(&self) -> Result<(), StoreError> {
        let deleted = self
            .store
            .delete_if_equals(&self.key, self.token.as_bytes())
            .await?;
        if !deleted {
            // Lease expired and someone else took over, or we never held it
            warn!(key = %self.key, "unlock found no matching holder, leaving key alone");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn store() -> Arc<dyn KeyValueStore> {
        Arc::new(InMemoryStore::new())
    }

    #[tokio::test]
    async fn test_mutual_exclusion() {
        let store = store();
        let ttl = Duration::from_secs(10);
        let first = SimpleLock::new(store.clone(), "res");
        let second = SimpleLock::new(store.clone(), "res");

        assert!(first.try_lock(ttl).await.unwrap());
        assert!(!second.try_lock(ttl).await.unwrap());

        first.unlock().await.unwrap();
        assert!(second.try_lock(ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let store = store();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let lock = SimpleLock::new(store, "res");
                lock.try_lock(Duration::from_secs(10)).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_stale_holder_cannot_release_new_owner() {
        // Regression for the TTL-expiry race: the first holder's lease runs
        // out, a second holder acquires, then the first holder unlocks.
        let store = store();
        let stale = SimpleLock::new(store.clone(), "res");
        let fresh = SimpleLock::new(store.clone(), "res");

        assert!(stale.try_lock(Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(fresh.try_lock(Duration::from_secs(10)).await.unwrap());
        stale.unlock().await.unwrap();

        // The fresh holder's lock survived the stale unlock
        let third = SimpleLock::new(store.clone(), "res");
        assert!(!third.try_lock(Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_expires_on_its_own() {
        let store = store();
        let first = SimpleLock::new(store.clone(), "res");
        let second = SimpleLock::new(store.clone(), "res");

        assert!(first.try_lock(Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(second.try_lock(Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_not_reentrant() {
        let store = store();
        let lock = SimpleLock::new(store, "res");
        assert!(lock.try_lock(Duration::from_secs(10)).await.unwrap());
        assert!(!lock.try_lock(Duration::from_secs(10)).await.unwrap());
    }
}
