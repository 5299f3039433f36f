use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;

use super::VolatileStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-process volatile store backed by a `DashMap`.
///
/// Expiry is lazy: entries are dropped when a read or increment finds them
/// past their deadline. Good enough for tests and single-node deployments
/// where the working set is bounded by client diversity.
#[derive(Default)]
pub struct MemoryStore {
    map: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VolatileStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.map.get(key) {
            if !entry.expired() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Drop expired entries on the way out.
        self.map.remove_if(key, |_, e| e.expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.map.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self.map.remove(key) {
            Some((_, entry)) => Ok(!entry.expired()),
            None => Ok(false),
        }
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.bump(key, None)
    }

    async fn incr_expire(&self, key: &str, ttl: Duration) -> Result<i64> {
        self.bump(key, Some(ttl))
    }
}

impl MemoryStore {
    fn bump(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        let mut entry = self.map.entry(key.to_owned()).or_insert_with(|| Entry {
            value: "0".to_owned(),
            expires_at: None,
        });
        if entry.expired() {
            entry.value = "0".to_owned();
            entry.expires_at = None;
        }
        let count = entry
            .value
            .parse::<i64>()
            .map_err(|_| anyhow!("counter key {key} holds a non-integer value"))?
            + 1;
        entry.value = count.to_string();
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(count)
    }
}
