use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::models::Link;
use crate::storage::Storage;
use crate::volatile::{keys, VolatileStore};

const SNAPSHOT_TTL: Duration = Duration::from_secs(60 * 60);

/// Read-through link resolver.
///
/// Link snapshots (the link row with its active targets embedded) live in
/// the volatile store under `link:{link_id}` with a 1 hour TTL. A request
/// works on the snapshot it resolved, so capacity and rotation decisions
/// see one consistent target list even if the admin surface rewrites the
/// link mid-flight.
///
/// Cache failures are never fatal: a broken probe falls through to the
/// persistent store, and a failed write-back only costs the next request a
/// store round trip. Negative results are not cached; links are created
/// out of band and should become routable as soon as the row lands.
#[derive(Clone)]
pub struct LinkResolver {
    storage: Arc<dyn Storage>,
    volatile: Arc<dyn VolatileStore>,
}

impl LinkResolver {
    pub fn new(storage: Arc<dyn Storage>, volatile: Arc<dyn VolatileStore>) -> Self {
        Self { storage, volatile }
    }

    /// Resolve an active link by short id. `Ok(None)` means no active link
    /// matches; `Err` means the persistent store is unreachable.
    pub async fn resolve(&self, link_id: &str) -> Result<Option<Link>> {
        let key = keys::link_snapshot(link_id);

        match self.volatile.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Link>(&raw) {
                Ok(link) => return Ok(Some(link)),
                Err(e) => {
                    warn!("discarding undecodable snapshot for {link_id}: {e}");
                    let _ = self.volatile.delete(&key).await;
                }
            },
            Ok(None) => {}
            Err(e) => warn!("snapshot probe failed for {link_id}, falling through: {e}"),
        }

        let Some(link) = self.storage.get_link(link_id).await? else {
            return Ok(None);
        };

        if let Err(e) = self.cache_link(&link).await {
            warn!("failed to cache snapshot for {link_id}: {e}");
        }

        Ok(Some(link))
    }

    /// Write (or rewrite) the cached snapshot for a link. The admin path
    /// invalidates by calling this after a mutation.
    pub async fn cache_link(&self, link: &Link) -> Result<()> {
        let raw = serde_json::to_string(link)?;
        self.volatile
            .set(&keys::link_snapshot(&link.link_id), &raw, Some(SNAPSHOT_TTL))
            .await
    }
}
