use anyhow::Result;
use async_trait::async_trait;

use crate::models::{AccessLog, Link, Target};

/// Persistent store behind the dispatcher.
///
/// The dispatcher itself only reads links and appends access logs; link and
/// target rows are owned by the admin surface. The create methods are the
/// seam that surface (and the test suites) use to seed data.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (run migrations, etc.)
    async fn init(&self) -> Result<()>;

    /// Fetch one active link by its short id, with its active targets
    /// hydrated in configured order. Inactive links read as absent.
    async fn get_link(&self, link_id: &str) -> Result<Option<Link>>;

    /// Transactionally bump the hit counters of a link and one of its
    /// targets.
    async fn increment_hits(&self, link_pk: i64, target_pk: i64) -> Result<()>;

    /// Append one access-log row. `log.id` is ignored.
    async fn insert_access_log(&self, log: &AccessLog) -> Result<()>;

    /// Insert a link row, returning its primary key. `link.targets` is not
    /// persisted here; insert targets separately.
    async fn create_link(&self, link: &Link) -> Result<i64>;

    /// Insert a target row, returning its primary key.
    async fn create_target(&self, target: &Target) -> Result<i64>;

    /// Access-log rows for a link, newest first. Read by the external
    /// stats surface.
    async fn access_logs_for_link(&self, link_pk: i64, limit: i64) -> Result<Vec<AccessLog>>;
}
