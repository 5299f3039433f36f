use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::VolatileStore;

/// Redis-backed volatile store.
///
/// Uses a `ConnectionManager`, which multiplexes one connection and
/// reconnects on its own; clones are cheap and each operation works on a
/// clone. All round trips are bounded by `op_timeout` so a wedged server
/// surfaces as an error instead of stalling request tasks.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        debug!("connected to volatile store at {}", redis_url);
        Ok(Self {
            connection,
            op_timeout: Duration::from_secs(2),
        })
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(anyhow!("volatile store {op} failed: {e}")),
            Err(_) => Err(anyhow!("volatile store {op} timed out")),
        }
    }
}

#[async_trait]
impl VolatileStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        self.bounded("get", async move { conn.get(&key).await }).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        let value = value.to_owned();
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                self.bounded("set", async move { conn.set_ex(&key, &value, secs).await })
                    .await
            }
            None => self.bounded("set", async move { conn.set(&key, &value).await }).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        let deleted: i64 = self.bounded("del", async move { conn.del(&key).await }).await?;
        Ok(deleted > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        self.bounded("incr", async move { conn.incr(&key, 1).await }).await
    }

    async fn incr_expire(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        let secs = ttl.as_secs().max(1) as i64;
        let (count,): (i64,) = self
            .bounded("incr+expire", async move {
                let mut pipe = redis::pipe();
                pipe.atomic().incr(&key, 1).expire(&key, secs).ignore();
                pipe.query_async(&mut conn).await
            })
            .await?;
        Ok(count)
    }
}
