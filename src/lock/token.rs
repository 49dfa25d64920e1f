//! Lock-holder identity
//!
//! A token must be unique across the whole cluster, not just inside one
//! process: thread and task ids are only locally unique and survive process
//! restarts, so a token built from them alone can collide with a previous
//! holder's. Tokens here combine a per-process UUID with a per-process
//! sequence number.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use uuid::Uuid;

/// UUID identifying this process instance, generated on first use
fn process_id() -> &'static str {
    static PROCESS_ID: OnceLock<String> = OnceLock::new();
    PROCESS_ID.get_or_init(|| Uuid::new_v4().simple().to_string())
}

/// Mint a fresh holder token, unique across processes and within this one
pub fn holder_token() -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", process_id(), seq)
}
