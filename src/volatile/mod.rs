//! Volatile key-value store used for counters, block lists, rotation
//! memory and link snapshots.
//!
//! Two backends implement the same trait: Redis for real deployments and
//! an in-process map for tests and single-node setups. Every operation on
//! the Redis backend runs under a short deadline; a timed-out call is
//! indistinguishable from an unreachable store, and callers decide
//! per call site whether that fails open or closed.

mod memory;
mod redis_store;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Key layout shared by all components. Operators grep for these, so the
/// formats are part of the external interface.
pub mod keys {
    pub fn link_snapshot(link_id: &str) -> String {
        format!("link:{link_id}")
    }

    pub fn ip_rate(ip: &str) -> String {
        format!("rate_limit:ip:{ip}")
    }

    pub fn ip_link_rate(ip: &str, link_id: &str) -> String {
        format!("rate_limit:ip:{ip}:link:{link_id}")
    }

    pub fn global_cap(link_id: &str) -> String {
        format!("global_cap:link:{link_id}")
    }

    pub fn blocked_ip(ip: &str) -> String {
        format!("blocked_ip:{ip}")
    }

    pub fn ip_access(ip: &str) -> String {
        format!("ip_access:{ip}")
    }

    pub fn rotation(ip: &str, link_id: &str) -> String {
        format!("ip_memory:{ip}:{link_id}")
    }
}

#[async_trait]
pub trait VolatileStore: Send + Sync {
    /// Fetch a value. `None` means absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, optionally with a TTL. A later write replaces both
    /// the value and the TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically increment an integer key without touching its TTL.
    /// Missing keys start at zero.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Atomically increment an integer key and (re)arm its TTL in the same
    /// round trip. Re-arming on every increment is load-bearing for the
    /// rate-limit windows: an active key never expires.
    async fn incr_expire(&self, key: &str, ttl: Duration) -> Result<i64>;
}
