//! In-memory storage implementation
//!
//! A process-local stand-in for the remote store. A single mutex around the
//! map makes every [`KeyValueStore`] method atomic, which is exactly the
//! guarantee a scripted operation has on a real single-threaded server.
//! Expired entries are removed lazily on access.

use super::entry::Entry;
use super::value::Value;
use super::{KeyValueStore, ReleaseOutcome, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use siphasher::sip::SipHasher13;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Type alias for our hash map with SipHasher
type StoreMap = HashMap<Bytes, Entry, BuildHasherDefault<SipHasher13>>;

/// Buffered messages per channel before slow subscribers start lagging
const CHANNEL_CAPACITY: usize = 64;

/// In-memory key-value store
///
/// Shared across tasks via `Arc`. Suitable for tests and embedded
/// single-process deployments; a production cluster substitutes an adapter
/// over a real remote store behind the same trait.
pub struct InMemoryStore {
    /// The main storage map
    store: Mutex<StoreMap>,

    /// Pub/sub channels, created on first publish or subscribe
    channels: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
}

impl InMemoryStore {
    /// Create a new store with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new store with specified initial capacity
    pub fn with_capacity(capacity: usize) -> Self {
        InMemoryStore {
            store: Mutex::new(HashMap::with_capacity_and_hasher(
                capacity,
                BuildHasherDefault::<SipHasher13>::default(),
            )),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the map, recovering from a poisoned mutex
    ///
    /// A panicking test thread must not wedge every other caller.
    fn map(&self) -> MutexGuard<'_, StoreMap> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Bytes>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a live entry, removing it first if it has expired
    fn live_entry<'a>(map: &'a mut StoreMap, key: &[u8]) -> Option<&'a mut Entry> {
        let expired = map.get(key).map(|e| e.is_expired()).unwrap_or(false);
        if expired {
            map.remove(key);
            return None;
        }
        map.get_mut(key)
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Bytes> {
        self.channels()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Number of live keys (for tests and diagnostics)
    pub fn len(&self) -> usize {
        self.map().values().filter(|e| !e.is_expired()).count()
    }

    /// Check if the store holds no live keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut map = self.map();
        match Self::live_entry(&mut map, key.as_bytes()) {
            Some(entry) => entry
                .value
                .as_bytes()
                .map(Some)
                .ok_or_else(|| StoreError::WrongType {
                    key: key.to_string(),
                    kind: entry.value.type_name(),
                }),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError> {
        let entry = match ttl {
            Some(ttl) => Entry::with_expiration(Value::String(value), ttl),
            None => Entry::new(Value::String(value)),
        };
        self.map().insert(Bytes::from(key.to_string()), entry);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut map = self.map();
        if Self::live_entry(&mut map, key.as_bytes()).is_some() {
            return Ok(false);
        }
        map.insert(
            Bytes::from(key.to_string()),
            Entry::with_expiration(Value::String(value), ttl),
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut map = self.map();
        match map.remove(key.as_bytes()) {
            Some(entry) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut map = self.map();
        if let Some(entry) = Self::live_entry(&mut map, key.as_bytes()) {
            let current = entry
                .value
                .as_integer()
                .ok_or_else(|| StoreError::WrongType {
                    key: key.to_string(),
                    kind: entry.value.type_name(),
                })?;
            let next = current.wrapping_add(1);
            entry.value = Value::Integer(next);
            return Ok(next);
        }
        map.insert(Bytes::from(key.to_string()), Entry::new(Value::Integer(1)));
        Ok(1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut map = self.map();
        Ok(Self::live_entry(&mut map, key.as_bytes()).and_then(|e| e.remaining_ttl()))
    }

    async fn publish(&self, channel: &str, message: Bytes) -> Result<usize, StoreError> {
        let receivers = match self.channels().get(channel) {
            // send only errors when there are no receivers
            Some(sender) => sender.send(message).unwrap_or(0),
            None => 0,
        };
        debug!(channel, receivers, "published message");
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Bytes>, StoreError> {
        Ok(self.sender_for(channel).subscribe())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        let mut map = self.map();
        let matches = match Self::live_entry(&mut map, key.as_bytes()) {
            Some(entry) => entry.value.as_bytes().map(|b| b == expected).unwrap_or(false),
            None => false,
        };
        if matches {
            map.remove(key.as_bytes());
        }
        Ok(matches)
    }

    async fn acquire_reentrant(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<Option<Duration>, StoreError> {
        let mut map = self.map();
        if let Some(entry) = Self::live_entry(&mut map, key.as_bytes()) {
            let fields = match &mut entry.value {
                Value::Hash(fields) => fields,
                other => {
                    return Err(StoreError::WrongType {
                        key: key.to_string(),
                        kind: other.type_name(),
                    })
                }
            };
            return match fields.get_mut(token) {
                Some(count) => {
                    *count += 1;
                    entry.set_expiration(ttl);
                    Ok(None)
                }
                // Held by someone else: report how long they have left
                None => Ok(entry.remaining_ttl()),
            };
        }
        let mut fields = HashMap::new();
        fields.insert(token.to_string(), 1);
        map.insert(
            Bytes::from(key.to_string()),
            Entry::with_expiration(Value::Hash(fields), ttl),
        );
        Ok(None)
    }

    async fn release_reentrant(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
        channel: &str,
    ) -> Result<ReleaseOutcome, StoreError> {
        let outcome = {
            let mut map = self.map();
            let outcome = match Self::live_entry(&mut map, key.as_bytes()) {
                Some(entry) => {
                    let fields = match &mut entry.value {
                        Value::Hash(fields) => fields,
                        other => {
                            return Err(StoreError::WrongType {
                                key: key.to_string(),
                                kind: other.type_name(),
                            })
                        }
                    };
                    match fields.get_mut(token) {
                        Some(count) => {
                            *count -= 1;
                            if *count > 0 {
                                entry.set_expiration(ttl);
                                ReleaseOutcome::StillHeld
                            } else {
                                ReleaseOutcome::Released
                            }
                        }
                        None => ReleaseOutcome::NotHolder,
                    }
                }
                None => ReleaseOutcome::NotHolder,
            };
            if outcome == ReleaseOutcome::Released {
                map.remove(key.as_bytes());
            }
            outcome
        };
        // Notify outside the map lock; waiters re-run their acquire anyway
        if outcome == ReleaseOutcome::Released {
            self.publish(channel, Bytes::from_static(b"released")).await?;
        }
        Ok(outcome)
    }

    async fn refresh_if_holder(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut map = self.map();
        match Self::live_entry(&mut map, key.as_bytes()) {
            Some(entry) => {
                let holds = match &entry.value {
                    Value::Hash(fields) => fields.contains_key(token),
                    other => {
                        return Err(StoreError::WrongType {
                            key: key.to_string(),
                            kind: other.type_name(),
                        })
                    }
                };
                if holds {
                    entry.set_expiration(ttl);
                }
                Ok(holds)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_set_get() {
        let store = InMemoryStore::new();
        store
            .set("key1", Bytes::from("value1"), None)
            .await
            .unwrap();

        let value = store.get("key1").await.unwrap().unwrap();
        assert_eq!(value, Bytes::from("value1"));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryStore::new();
        store.set("key1", Bytes::from("v"), None).await.unwrap();

        assert!(store.delete("key1").await.unwrap());
        assert_eq!(store.get("key1").await.unwrap(), None);
        assert!(!store.delete("key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_physical_expiration() {
        let store = InMemoryStore::new();
        store
            .set("key1", Bytes::from("v"), Some(Duration::from_millis(20)))
            .await
            .unwrap();

        assert!(store.get("key1").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("key1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(10);

        assert!(store
            .set_if_absent("lock", Bytes::from("a"), ttl)
            .await
            .unwrap());
        assert!(!store
            .set_if_absent("lock", Bytes::from("b"), ttl)
            .await
            .unwrap());
        // First writer's value survives
        assert_eq!(store.get("lock").await.unwrap().unwrap(), Bytes::from("a"));
    }

    #[tokio::test]
    async fn test_set_if_absent_after_expiry() {
        let store = InMemoryStore::new();
        store
            .set_if_absent("lock", Bytes::from("a"), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store
            .set_if_absent("lock", Bytes::from("b"), Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_increment_is_sequential() {
        let store = InMemoryStore::new();
        assert_eq!(store.increment("seq").await.unwrap(), 1);
        assert_eq!(store.increment("seq").await.unwrap(), 2);
        assert_eq!(store.increment("seq").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_increment_wrong_type() {
        let store = InMemoryStore::new();
        store.set("k", Bytes::from("text"), None).await.unwrap();
        assert!(matches!(
            store.increment("k").await,
            Err(StoreError::WrongType { kind: "string", .. })
        ));

        // Lock operations report the offending kind too
        store.set("lock", Bytes::from("tok"), None).await.unwrap();
        let err = store
            .acquire_reentrant("lock", "me", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "wrong value type for key 'lock' (holds string)");
    }

    #[tokio::test]
    async fn test_delete_if_equals() {
        let store = InMemoryStore::new();
        store.set("lock", Bytes::from("tok-1"), None).await.unwrap();

        assert!(!store.delete_if_equals("lock", b"tok-2").await.unwrap());
        assert!(store.get("lock").await.unwrap().is_some());

        assert!(store.delete_if_equals("lock", b"tok-1").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reentrant_record_lifecycle() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(10);

        // First acquire creates the record
        assert_eq!(
            store.acquire_reentrant("lock", "me", ttl).await.unwrap(),
            None
        );
        // Re-entry by the same token succeeds
        assert_eq!(
            store.acquire_reentrant("lock", "me", ttl).await.unwrap(),
            None
        );
        // A different token is told how long to wait
        let remaining = store
            .acquire_reentrant("lock", "other", ttl)
            .await
            .unwrap()
            .unwrap();
        assert!(remaining <= ttl);

        // Two releases to fully let go
        assert_eq!(
            store
                .release_reentrant("lock", "me", ttl, "lock:released")
                .await
                .unwrap(),
            ReleaseOutcome::StillHeld
        );
        assert_eq!(
            store
                .release_reentrant("lock", "me", ttl, "lock:released")
                .await
                .unwrap(),
            ReleaseOutcome::Released
        );
        assert_eq!(
            store.acquire_reentrant("lock", "other", ttl).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_lease_refreshed_on_reacquire_and_partial_release() {
        let store = InMemoryStore::new();
        store
            .acquire_reentrant("lock", "me", Duration::from_millis(80))
            .await
            .unwrap();

        // Re-entering with a longer lease extends the record's TTL
        store
            .acquire_reentrant("lock", "me", Duration::from_secs(10))
            .await
            .unwrap();
        let remaining = store.ttl("lock").await.unwrap().unwrap();
        assert!(remaining > Duration::from_secs(5));

        // A partial release refreshes the lease too
        assert_eq!(
            store
                .release_reentrant("lock", "me", Duration::from_secs(20), "lock:released")
                .await
                .unwrap(),
            ReleaseOutcome::StillHeld
        );
        let remaining = store.ttl("lock").await.unwrap().unwrap();
        assert!(remaining > Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_release_by_non_holder_is_noop() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(10);
        store.acquire_reentrant("lock", "me", ttl).await.unwrap();

        assert_eq!(
            store
                .release_reentrant("lock", "other", ttl, "lock:released")
                .await
                .unwrap(),
            ReleaseOutcome::NotHolder
        );
        // Holder still in place
        assert!(store.refresh_if_holder("lock", "me", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_publishes_notification() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(10);
        let mut rx = store.subscribe("lock:released").await.unwrap();

        store.acquire_reentrant("lock", "me", ttl).await.unwrap();
        store
            .release_reentrant("lock", "me", ttl, "lock:released")
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, Bytes::from_static(b"released"));
    }

    #[tokio::test]
    async fn test_refresh_if_holder() {
        let store = InMemoryStore::new();
        store
            .acquire_reentrant("lock", "me", Duration::from_millis(50))
            .await
            .unwrap();

        assert!(store
            .refresh_if_holder("lock", "me", Duration::from_secs(10))
            .await
            .unwrap());
        let remaining = store.ttl("lock").await.unwrap().unwrap();
        assert!(remaining > Duration::from_secs(5));

        assert!(!store
            .refresh_if_holder("lock", "other", Duration::from_secs(10))
            .await
            .unwrap());
    }
}
