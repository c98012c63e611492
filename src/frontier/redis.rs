//! Redis-backed frontier store
//!
//! Each checkpoint is one sorted set (member = URL, score = depth). A save is
//! a single MULTI/EXEC pipeline of DEL, ZADD and EXPIRE, so readers never see
//! a half-written checkpoint.

use std::time::Duration;

use ::redis::AsyncCommands;
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};

use super::FrontierStore;
use crate::config::FrontierConfig;
use crate::error::{Error, Result};
use crate::models::FrontierEntry;

/// ZADD batch size for large frontiers
const ZADD_CHUNK: usize = 1000;

pub struct RedisFrontierStore {
    pool: Pool,
}

impl RedisFrontierStore {
    /// Connect and verify with PING
    pub async fn new(config: &FrontierConfig) -> Result<Self> {
        let pool = PoolConfig::from_url(&config.redis_url)
            .builder()
            .map_err(|e| Error::frontier_unavailable(format!("failed to create pool builder: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::frontier_unavailable(format!("failed to create pool: {e}")))?;

        let store = Self { pool };
        if !store.health_check().await? {
            return Err(Error::frontier_unavailable("unexpected PING reply"));
        }

        tracing::info!(url = %config.redis_url, "Connected to frontier store");
        Ok(store)
    }

    /// Connect, returning None if Redis is unavailable
    pub async fn try_new(config: &FrontierConfig) -> Option<Self> {
        match Self::new(config).await {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "Frontier store unavailable, continuing without checkpoints");
                None
            }
        }
    }
}

#[async_trait]
impl FrontierStore for RedisFrontierStore {
    async fn save(&self, key: &str, entries: &[FrontierEntry], ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await?;

        let mut pipe = ::redis::pipe();
        pipe.atomic().del(key).ignore();
        for chunk in entries.chunks(ZADD_CHUNK) {
            let members: Vec<(f64, &str)> = chunk
                .iter()
                .map(|e| (e.depth as f64, e.url.as_str()))
                .collect();
            pipe.zadd_multiple(key, &members).ignore();
        }
        if !entries.is_empty() {
            pipe.expire(key, ttl.as_secs().max(1) as i64).ignore();
        }
        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Vec<(String, f64)>> {
        let mut conn = self.pool.get().await?;
        let pairs: Vec<(String, f64)> = conn.zrange_withscores(key, 0, -1).await?;
        Ok(pairs)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn size(&self, key: &str) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let reply: String = ::redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(reply == "PONG")
    }
}
