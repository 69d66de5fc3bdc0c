use async_trait::async_trait;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::{CacheError, CacheResult, EventCache};
use crate::redis_client::SharedConnectionManager;

/// Upper bound for a single cache round trip.
const REDIS_TIMEOUT: Duration = Duration::from_secs(2);

/// [`EventCache`] backed by Redis `GET` / `SET .. EX`.
#[derive(Clone)]
pub struct RedisEventCache {
    redis: SharedConnectionManager,
}

impl RedisEventCache {
    pub fn new(redis: SharedConnectionManager) -> Self {
        Self { redis }
    }
}

async fn with_timeout<T, F>(fut: F) -> CacheResult<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(REDIS_TIMEOUT, fut).await {
        Ok(result) => result.map_err(CacheError::Redis),
        Err(_) => Err(CacheError::Timeout),
    }
}

#[async_trait]
impl EventCache for RedisEventCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.redis.lock().await;
        let value: Option<String> = with_timeout(conn.get(key)).await?;
        debug!(key = %key, hit = value.is_some(), "Cache read");
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.redis.lock().await;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("EX").arg(ttl.as_secs().max(1));
        with_timeout(cmd.query_async::<_, ()>(&mut *conn)).await
    }
}
