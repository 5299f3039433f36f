//! Fire-and-forget hit accounting.
//!
//! Runs after the redirect has been written, detached from the request's
//! lifetime: the persistent hit counters, the volatile cap counter, the
//! per-IP access record and the access-log row are each attempted once
//! under a short deadline. Failures are logged and swallowed; nothing
//! here may affect a response, and the volatile counters remain the
//! source of truth for capacity decisions inside the window.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::limits::RateLimiter;
use crate::models::AccessLog;
use crate::storage::Storage;

const OP_DEADLINE: Duration = Duration::from_secs(1);

/// Everything the accounting path needs from a dispatched request.
pub struct AccountingEvent {
    pub link_pk: i64,
    pub link_id: String,
    pub target_pk: i64,
    pub ip: String,
    pub country: String,
    pub user_agent: String,
    pub referer: String,
}

/// Schedule the accounting work for one dispatched visit.
pub fn record(storage: Arc<dyn Storage>, limiter: RateLimiter, event: AccountingEvent) {
    tokio::spawn(async move {
        let deadline = |label: &'static str, result| log_outcome(label, &event.link_id, result);

        deadline(
            "hit increment",
            tokio::time::timeout(
                OP_DEADLINE,
                storage.increment_hits(event.link_pk, event.target_pk),
            )
            .await,
        );

        deadline(
            "cap increment",
            tokio::time::timeout(OP_DEADLINE, limiter.increment_cap(&event.link_id)).await,
        );

        deadline(
            "ip access record",
            tokio::time::timeout(
                OP_DEADLINE,
                limiter.record_ip_access(&event.ip, &event.country),
            )
            .await,
        );

        let log = AccessLog {
            id: 0,
            link_id: event.link_pk,
            target_id: event.target_pk,
            ip: event.ip.clone(),
            user_agent: event.user_agent.clone(),
            referer: event.referer.clone(),
            country: event.country.clone(),
            created_at: unix_now(),
        };
        deadline(
            "access log insert",
            tokio::time::timeout(OP_DEADLINE, storage.insert_access_log(&log)).await,
        );
    });
}

fn log_outcome(
    label: &'static str,
    link_id: &str,
    result: Result<anyhow::Result<()>, tokio::time::error::Elapsed>,
) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("accounting {label} failed for {link_id}: {e}"),
        Err(_) => warn!("accounting {label} timed out for {link_id}"),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
