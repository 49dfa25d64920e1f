//! Cache client implementation

use super::envelope::Envelope;
use super::CacheError;
use crate::lock::{DistributedLock, SimpleLock};
use crate::store::KeyValueStore;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Tuning knobs for the cache client
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL of the empty sentinel cached for ids absent from the source
    pub null_ttl: Duration,

    /// Lease of the per-key rebuild lock
    pub rebuild_lock_ttl: Duration,

    /// How many times a mutex-strategy reader retries a contended rebuild
    pub mutex_max_retries: u32,

    /// Pause between mutex-strategy retries
    pub mutex_retry_delay: Duration,

    /// Size of the background rebuild pool for the logical-expiry strategy
    pub rebuild_workers: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            null_ttl: Duration::from_secs(120),
            rebuild_lock_ttl: Duration::from_secs(10),
            mutex_max_retries: 50,
            mutex_retry_delay: Duration::from_millis(50),
            rebuild_workers: num_cpus::get().clamp(1, 16),
        }
    }
}

/// What a cache key currently holds
enum Lookup<T> {
    /// A real cached value
    Hit(T),

    /// The empty sentinel: the id is known to be absent from the source
    Empty,

    /// Nothing cached
    Miss,
}

/// Generic cache-aside helper over the key-value store
///
/// Values are serialized as JSON. Each read strategy takes a caller-supplied
/// asynchronous fallback `id -> Option<value>` which is the only path to the
/// source of truth. Cloning is cheap; clones share the store handle and the
/// rebuild pool.
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
    rebuild_permits: Arc<Semaphore>,
}

impl CacheClient {
    /// Create a client with default configuration
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    /// Create a client with explicit configuration
    pub fn with_config(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        let rebuild_permits = Arc::new(Semaphore::new(config.rebuild_workers));
        CacheClient {
            store,
            config,
            rebuild_permits,
        }
    }

    /// Serialize and cache a value under a physical TTL
    pub async fn write<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_vec(value)?;
        self.store.set(key, Bytes::from(json), Some(ttl)).await?;
        Ok(())
    }

    /// Cache a value wrapped in a logical-expiry envelope, with no physical TTL
    ///
    /// This is also the pre-warm entry point for
    /// [`read_with_logical_expiry`](Self::read_with_logical_expiry), which
    /// never populates a cold key by itself.
    pub async fn write_with_logical_expiry<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        logical_ttl: Duration,
    ) -> Result<(), CacheError> {
        let envelope = Envelope::new(value, logical_ttl);
        let json = serde_json::to_vec(&envelope)?;
        self.store.set(key, Bytes::from(json), None).await?;
        Ok(())
    }

    /// Read with null-caching penetration defense
    ///
    /// A miss calls the fallback; an id absent from the source is cached as a
    /// short-lived empty sentinel so the next lookups return `None` without
    /// touching the fallback.
    pub async fn read_pass_through<T, I, F, Fut>(
        &self,
        prefix: &str,
        id: I,
        ttl: Duration,
        fallback: F,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        I: Display,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<Option<T>, anyhow::Error>>,
    {
        let key = format!("{}{}", prefix, id);
        match self.lookup::<T>(&key).await? {
            Lookup::Hit(value) => Ok(Some(value)),
            Lookup::Empty => Ok(None),
            Lookup::Miss => match fallback(id).await.map_err(CacheError::Fallback)? {
                Some(value) => {
                    self.write(&key, &value, ttl).await?;
                    Ok(Some(value))
                }
                None => {
                    self.cache_empty(&key).await?;
                    Ok(None)
                }
            },
        }
    }

    /// Read with mutex breakdown defense
    ///
    /// On a miss, the winner of a short per-key lock repopulates the cache
    /// while every other reader sleeps and retries the whole read. Retries
    /// are bounded; exhausting them is a contention error, not a reason to
    /// stampede the source.
    pub async fn read_with_mutex<T, I, F, Fut>(
        &self,
        prefix: &str,
        id: I,
        ttl: Duration,
        fallback: F,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        I: Display,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<Option<T>, anyhow::Error>>,
    {
        let key = format!("{}{}", prefix, id);
        let lock = SimpleLock::new(self.store.clone(), &rebuild_lock_name(&key));

        let mut attempts = 0u32;
        loop {
            match self.lookup::<T>(&key).await? {
                Lookup::Hit(value) => return Ok(Some(value)),
                Lookup::Empty => return Ok(None),
                Lookup::Miss => {}
            }
            if lock.try_lock(self.config.rebuild_lock_ttl).await? {
                break;
            }
            attempts += 1;
            if attempts > self.config.mutex_max_retries {
                return Err(CacheError::RebuildContended { key });
            }
            tokio::time::sleep(self.config.mutex_retry_delay).await;
        }

        let result = self.populate(&key, id, ttl, fallback).await;
        if let Err(e) = lock.unlock().await {
            warn!(key = %key, error = %e, "rebuild lock release failed");
        }
        result
    }

    /// Read with logical-expiry breakdown defense
    ///
    /// A warm key always answers immediately: fresh values as-is, stale ones
    /// as-is too while one background worker rebuilds the entry. A cold key
    /// returns `None` without consulting the fallback; this strategy relies
    /// on pre-warming through
    /// [`write_with_logical_expiry`](Self::write_with_logical_expiry).
    pub async fn read_with_logical_expiry<T, I, F, Fut>(
        &self,
        prefix: &str,
        id: I,
        logical_ttl: Duration,
        fallback: F,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        I: Display + Send + 'static,
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, anyhow::Error>> + Send + 'static,
    {
        let key = format!("{}{}", prefix, id);
        let raw = match self.store.get(&key).await? {
            Some(raw) if !raw.is_empty() => raw,
            // Cold cache: deliberately not populated here
            _ => return Ok(None),
        };
        let envelope: Envelope<T> = serde_json::from_slice(&raw)?;
        if envelope.is_fresh() {
            return Ok(Some(envelope.data));
        }

        // Stale: serve it, and opportunistically kick off a rebuild
        let permit = match self.rebuild_permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(key = %key, "rebuild pool saturated, serving stale value");
                return Ok(Some(envelope.data));
            }
        };
        let lock = SimpleLock::new(self.store.clone(), &rebuild_lock_name(&key));
        if !lock.try_lock(self.config.rebuild_lock_ttl).await? {
            // Another worker already owns this rebuild
            return Ok(Some(envelope.data));
        }

        let client = self.clone();
        let task_key = key.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = client
                .rebuild_entry(&task_key, id, logical_ttl, fallback)
                .await
            {
                warn!(key = %task_key, error = %e, "background cache rebuild failed");
            }
            if let Err(e) = lock.unlock().await {
                warn!(key = %task_key, error = %e, "rebuild lock release failed");
            }
        });

        Ok(Some(envelope.data))
    }

    /// Fetch from the fallback and repopulate, double-checking the cache first
    async fn populate<T, I, F, Fut>(
        &self,
        key: &str,
        id: I,
        ttl: Duration,
        fallback: F,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        I: Display,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<Option<T>, anyhow::Error>>,
    {
        // A previous lock winner may have repopulated while we waited
        match self.lookup::<T>(key).await? {
            Lookup::Hit(value) => return Ok(Some(value)),
            Lookup::Empty => return Ok(None),
            Lookup::Miss => {}
        }
        match fallback(id).await.map_err(CacheError::Fallback)? {
            Some(value) => {
                self.write(key, &value, ttl).await?;
                debug!(key, "cache entry populated from source");
                Ok(Some(value))
            }
            None => {
                self.cache_empty(key).await?;
                debug!(key, "id absent from source, cached empty sentinel");
                Ok(None)
            }
        }
    }

    /// Background refresh of a logically expired entry
    async fn rebuild_entry<T, I, F, Fut>(
        &self,
        key: &str,
        id: I,
        logical_ttl: Duration,
        fallback: F,
    ) -> Result<(), CacheError>
    where
        T: Serialize + DeserializeOwned,
        I: Display,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<Option<T>, anyhow::Error>>,
    {
        // Double-check staleness; an earlier winner may have refreshed it
        if let Some(raw) = self.store.get(key).await? {
            if !raw.is_empty() {
                if let Ok(current) = serde_json::from_slice::<Envelope<serde_json::Value>>(&raw) {
                    if current.is_fresh() {
                        return Ok(());
                    }
                }
            }
        }
        match fallback(id).await.map_err(CacheError::Fallback)? {
            Some(fresh) => {
                self.write_with_logical_expiry(key, &fresh, logical_ttl)
                    .await?;
                debug!(key, "cache entry rebuilt");
            }
            None => {
                // The entity vanished from the source; drop the stale copy
                self.store.delete(key).await?;
                debug!(key, "entity gone from source, stale entry dropped");
            }
        }
        Ok(())
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Lookup<T>, CacheError> {
        match self.store.get(key).await? {
            Some(raw) if raw.is_empty() => Ok(Lookup::Empty),
            Some(raw) => Ok(Lookup::Hit(serde_json::from_slice(&raw)?)),
            None => Ok(Lookup::Miss),
        }
    }

    async fn cache_empty(&self, key: &str) -> Result<(), CacheError> {
        self.store
            .set(key, Bytes::new(), Some(self.config.null_ttl))
            .await?;
        Ok(())
    }
}

/// Lock name guarding the rebuild of one cache key
fn rebuild_lock_name(key: &str) -> String {
    format!("cache:{}", key)
}
