//! Rate-limit and capacity machine.
//!
//! Four independent counter tiers, all fixed-window:
//! - per-IP global window (`rate_limit:ip:{ip}`)
//! - per-(IP, link) window (`rate_limit:ip:{ip}:link:{id}`)
//! - per-link global cap (`global_cap:link:{id}`, no TTL)
//! - per-target cap (read from the link snapshot by the selector)
//!
//! The windowed counters use one pipelined increment-plus-expire per check,
//! so the TTL is re-armed on every hit. An IP that keeps sending never sees
//! its window close, which is what lets a quiet, steady abuser be
//! throttled at all. A count is allowed while it stays at or below the
//! limit; the limit is an inclusive ceiling.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tracing::debug;

use crate::models::IpAccessInfo;
use crate::volatile::{keys, VolatileStore};

/// Visits one IP may make to one link inside [`IP_LINK_WINDOW`].
pub const IP_LINK_LIMIT: i64 = 10;
pub const IP_LINK_WINDOW: Duration = Duration::from_secs(12 * 60 * 60);

/// How long an auto-blocked IP stays blocked.
pub const AUTO_BLOCK_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
pub const AUTO_BLOCK_REASON: &str = "rate limit exceeded";

const IP_ACCESS_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const COUNTER_RESET_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn VolatileStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn VolatileStore>) -> Self {
        Self { store }
    }

    /// Count this request against the IP's global window and report
    /// whether it is still within `limit`.
    pub async fn check_ip_limit(&self, ip: &str, limit: i64, window: Duration) -> Result<bool> {
        let count = self
            .store
            .incr_expire(&keys::ip_rate(ip), window)
            .await?;
        Ok(count <= limit)
    }

    /// Count this request against the (IP, link) window.
    pub async fn check_ip_link_limit(&self, ip: &str, link_id: &str) -> Result<bool> {
        let count = self
            .store
            .incr_expire(&keys::ip_link_rate(ip, link_id), IP_LINK_WINDOW)
            .await?;
        Ok(count <= IP_LINK_LIMIT)
    }

    /// Whether a link still has headroom under its global cap.
    ///
    /// The counter is read here but incremented on the accounting path
    /// after the response, so the cap is approximate under concurrency.
    /// A cap of 0 means unlimited.
    pub async fn check_global_cap(&self, link_id: &str, total_cap: i64) -> Result<bool> {
        if total_cap <= 0 {
            return Ok(true);
        }
        let count = match self.store.get(&keys::global_cap(link_id)).await? {
            Some(raw) => raw.parse::<i64>().unwrap_or(0),
            None => 0,
        };
        Ok(count < total_cap)
    }

    /// Bump a link's global-cap counter. Called from the accounting path.
    pub async fn increment_cap(&self, link_id: &str) -> Result<()> {
        self.store.incr(&keys::global_cap(link_id)).await?;
        Ok(())
    }

    /// Current value of a link's global-cap counter.
    pub async fn get_count(&self, link_id: &str) -> Result<i64> {
        Ok(match self.store.get(&keys::global_cap(link_id)).await? {
            Some(raw) => raw.parse::<i64>().unwrap_or(0),
            None => 0,
        })
    }

    /// Operator reset of a link's global-cap counter.
    pub async fn reset_counter(&self, link_id: &str) -> Result<()> {
        self.store
            .set(&keys::global_cap(link_id), "0", Some(COUNTER_RESET_TTL))
            .await
    }

    /// Put an IP on the block list for `duration` with a human-readable
    /// reason.
    pub async fn block_ip(&self, ip: &str, reason: &str, duration: Duration) -> Result<()> {
        debug!("blocking {ip} for {}s: {reason}", duration.as_secs());
        self.store
            .set(&keys::blocked_ip(ip), reason, Some(duration))
            .await
    }

    /// Remove an IP from the block list. This deletes the key outright
    /// rather than writing an empty value.
    pub async fn unblock_ip(&self, ip: &str) -> Result<()> {
        self.store.delete(&keys::blocked_ip(ip)).await?;
        Ok(())
    }

    /// Single read against the block list. `Some(reason)` means blocked.
    pub async fn is_ip_blocked(&self, ip: &str) -> Result<Option<String>> {
        self.store.get(&keys::blocked_ip(ip)).await
    }

    /// Upsert the rolling access record for an IP. Best effort; called
    /// from the accounting path.
    pub async fn record_ip_access(&self, ip: &str, country: &str) -> Result<()> {
        let key = keys::ip_access(ip);
        let previous_count = match self.store.get(&key).await? {
            Some(raw) => serde_json::from_str::<IpAccessInfo>(&raw)
                .map(|info| info.count)
                .unwrap_or(0),
            None => 0,
        };
        let info = IpAccessInfo {
            count: previous_count + 1,
            last_access: unix_now(),
            country: country.to_string(),
        };
        self.store
            .set(&key, &serde_json::to_string(&info)?, Some(IP_ACCESS_TTL))
            .await
    }

    pub async fn get_ip_access(&self, ip: &str) -> Result<Option<IpAccessInfo>> {
        match self.store.get(&keys::ip_access(ip)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
