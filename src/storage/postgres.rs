use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

use crate::models::{AccessLog, Link, Target};
use crate::storage::Storage;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id BIGSERIAL PRIMARY KEY,
                link_id TEXT NOT NULL UNIQUE,
                business_unit TEXT NOT NULL,
                network TEXT NOT NULL DEFAULT '',
                total_cap BIGINT NOT NULL DEFAULT 0,
                current_hits BIGINT NOT NULL DEFAULT 0,
                backup_url TEXT,
                is_active BOOLEAN NOT NULL DEFAULT TRUE
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS targets (
                id BIGSERIAL PRIMARY KEY,
                link_id BIGINT NOT NULL,
                url TEXT NOT NULL,
                weight BIGINT NOT NULL DEFAULT 1,
                cap BIGINT NOT NULL DEFAULT 0,
                current_hits BIGINT NOT NULL DEFAULT 0,
                countries TEXT NOT NULL DEFAULT '',
                param_mapping TEXT NOT NULL DEFAULT '',
                static_params TEXT NOT NULL DEFAULT '',
                is_active BOOLEAN NOT NULL DEFAULT TRUE
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS access_logs (
                id BIGSERIAL PRIMARY KEY,
                link_id BIGINT NOT NULL,
                target_id BIGINT NOT NULL,
                ip TEXT NOT NULL,
                user_agent TEXT NOT NULL DEFAULT '',
                referer TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_targets_link_id ON targets(link_id)")
            .execute(self.pool.as_ref())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_access_logs_link_id ON access_logs(link_id)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn get_link(&self, link_id: &str) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(
            r#"
            SELECT id, link_id, business_unit, network, total_cap, current_hits,
                   backup_url, is_active
            FROM links
            WHERE link_id = $1 AND is_active = TRUE
            "#,
        )
        .bind(link_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        let Some(mut link) = link else {
            return Ok(None);
        };

        link.targets = sqlx::query_as::<_, Target>(
            r#"
            SELECT id, link_id, url, weight, cap, current_hits, countries,
                   param_mapping, static_params, is_active
            FROM targets
            WHERE link_id = $1 AND is_active = TRUE
            ORDER BY id
            "#,
        )
        .bind(link.id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(Some(link))
    }

    async fn increment_hits(&self, link_pk: i64, target_pk: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE links SET current_hits = current_hits + 1 WHERE id = $1")
            .bind(link_pk)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE targets SET current_hits = current_hits + 1 WHERE id = $1")
            .bind(target_pk)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_access_log(&self, log: &AccessLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO access_logs (link_id, target_id, ip, user_agent, referer, country, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.link_id)
        .bind(log.target_id)
        .bind(&log.ip)
        .bind(&log.user_agent)
        .bind(&log.referer)
        .bind(&log.country)
        .bind(log.created_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn create_link(&self, link: &Link) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO links (link_id, business_unit, network, total_cap, current_hits, backup_url, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&link.link_id)
        .bind(&link.business_unit)
        .bind(&link.network)
        .bind(link.total_cap)
        .bind(link.current_hits)
        .bind(&link.backup_url)
        .bind(link.is_active)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(id)
    }

    async fn create_target(&self, target: &Target) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO targets (link_id, url, weight, cap, current_hits, countries, param_mapping, static_params, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(target.link_id)
        .bind(&target.url)
        .bind(target.weight)
        .bind(target.cap)
        .bind(target.current_hits)
        .bind(&target.countries)
        .bind(&target.param_mapping)
        .bind(&target.static_params)
        .bind(target.is_active)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(id)
    }

    async fn access_logs_for_link(&self, link_pk: i64, limit: i64) -> Result<Vec<AccessLog>> {
        let logs = sqlx::query_as::<_, AccessLog>(
            r#"
            SELECT id, link_id, target_id, ip, user_agent, referer, country, created_at
            FROM access_logs
            WHERE link_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(link_pk)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(logs)
    }
}
