//! Stampede - distributed caching and concurrency control for flash sales
//!
//! Stampede sits between a request-handling web tier and a relational store,
//! talking to a shared Redis-style key-value store:
//! - `store`: the narrow adapter every other component uses, plus an
//!   in-memory implementation with the same atomicity guarantees
//! - `lock`: lease-based distributed locks, simple and reentrant
//! - `id`: cluster-wide unique, roughly time-ordered 64-bit identifiers
//! - `cache`: cache-aside reads with penetration and breakdown defenses
//! - `order`: the flash-sale order protocol composing all of the above
//!
//! The relational store is only ever reached through caller-supplied
//! fallbacks and the `OrderRepository` seam, never directly.

pub mod cache;
pub mod id;
pub mod lock;
pub mod order;
pub mod store;

/// Re-export commonly used types
pub use cache::{CacheClient, CacheConfig, CacheError, Envelope};
pub use id::IdGenerator;
pub use lock::{DistributedLock, ReentrantLock, SimpleLock};
pub use order::{OrderError, OrderReceipt, OrderRepository, OrderWorkflow};
pub use store::{InMemoryStore, KeyValueStore, StoreError};
