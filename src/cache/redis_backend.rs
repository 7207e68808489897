use async_trait::async_trait;
use log::{info, warn};
use redis::aio::MultiplexedConnection;
use tokio::sync::RwLock;

use super::CacheBackend;
use crate::core::error::{TaxError, TaxResult};
use crate::core::shared::utils::redact_url;

pub struct RedisCacheBackend {
    client: redis::Client,
    url: String,
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisCacheBackend {
    pub fn new(redis_url: &str) -> TaxResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| TaxError::CacheUnavailable(format!("Invalid Redis URL: {e}")))?;
        Ok(Self {
            client,
            url: redact_url(redis_url),
            connection: RwLock::new(None),
        })
    }

    /// A connection that just answered PING.
    async fn live_connection(&self) -> TaxResult<MultiplexedConnection> {
        let mut conn = self.connection.read().await.clone().ok_or_else(|| {
            TaxError::CacheUnavailable("Cache connection is not established".into())
        })?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| unavailable("PING", e))?;
        Ok(conn)
    }
}

fn unavailable(op: &str, e: redis::RedisError) -> TaxError {
    TaxError::CacheUnavailable(format!("Redis {op} failed: {e}"))
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn connect(&self) -> TaxResult<()> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| unavailable("connect", e))?;
        *self.connection.write().await = Some(conn);
        info!("Connected to Redis at {}", self.url);
        Ok(())
    }

    async fn close(&self) {
        if self.connection.write().await.take().is_some() {
            info!("Closed Redis connection to {}", self.url);
        }
    }

    async fn ping(&self) -> TaxResult<()> {
        self.live_connection().await.map(|_| ())
    }

    async fn get(&self, key: &str) -> TaxResult<Option<String>> {
        let mut conn = self.live_connection().await?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("GET", e))
    }

    async fn set_many(&self, entries: &[(String, String)], ttl_secs: Option<u64>) -> TaxResult<()> {
        let mut conn = self.live_connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            match ttl_secs {
                Some(ttl) => pipe.cmd("SETEX").arg(key).arg(ttl).arg(value).ignore(),
                None => pipe.cmd("SET").arg(key).arg(value).ignore(),
            };
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| unavailable("SET", e))
    }

    async fn delete(&self, keys: &[String]) -> TaxResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.live_connection().await?;
        redis::cmd("DEL")
            .arg(keys.to_vec())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| {
                warn!("Failed to delete {} cache keys", keys.len());
                unavailable("DEL", e)
            })
    }
}
