//! Per-(IP, link) rotation memory.
//!
//! Spreads successive visits from one IP across all eligible targets
//! before any target repeats. The state is a small visit-count map stored
//! under `ip_memory:{ip}:{link_id}` with a sliding 12 hour TTL. This is a
//! usability property, not a fairness guarantee: concurrent requests from
//! the same IP may race on the map and skew the distribution slightly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::models::Target;
use crate::volatile::{keys, VolatileStore};

const ROTATION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Clone)]
pub struct RotationMemory {
    store: Arc<dyn VolatileStore>,
}

impl RotationMemory {
    pub fn new(store: Arc<dyn VolatileStore>) -> Self {
        Self { store }
    }

    /// Pick the next target for this (IP, link) pair.
    ///
    /// The first eligible target (in configured order) that the IP has not
    /// visited wins; once every target has been visited, the least-visited
    /// one wins, ties broken by configured order. The chosen target's
    /// count is bumped and the map persisted with a refreshed TTL.
    ///
    /// Any store error bubbles up untouched; the caller falls back to
    /// weighted selection. No retries here.
    pub async fn pick<'a>(
        &self,
        ip: &str,
        link_id: &str,
        eligible: &[&'a Target],
    ) -> Result<&'a Target> {
        anyhow::ensure!(!eligible.is_empty(), "no eligible targets");

        let key = keys::rotation(ip, link_id);
        let mut history: HashMap<String, u64> = match self.store.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => HashMap::new(),
        };

        let chosen = eligible
            .iter()
            .find(|t| !history.contains_key(&t.id.to_string()))
            .copied()
            .unwrap_or_else(|| least_visited(eligible, &history));

        *history.entry(chosen.id.to_string()).or_insert(0) += 1;
        self.store
            .set(&key, &serde_json::to_string(&history)?, Some(ROTATION_TTL))
            .await?;

        Ok(chosen)
    }

    /// Forget the visit history for one (IP, link) pair. Operator action.
    pub async fn clear(&self, ip: &str, link_id: &str) -> Result<()> {
        self.store.delete(&keys::rotation(ip, link_id)).await?;
        Ok(())
    }
}

fn least_visited<'a>(eligible: &[&'a Target], history: &HashMap<String, u64>) -> &'a Target {
    let mut selected = eligible[0];
    let mut min_visits = u64::MAX;
    for target in eligible {
        let visits = history.get(&target.id.to_string()).copied().unwrap_or(0);
        // Strict comparison keeps the first-in-order target on ties.
        if visits < min_visits {
            min_visits = visits;
            selected = target;
        }
    }
    selected
}
