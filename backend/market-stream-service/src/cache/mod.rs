//! Short-lived event cache.
//!
//! Holds the latest price snapshot per symbol and a bounded list of recent
//! arbitrage alerts, so clients that connect late (or poll over HTTP) can
//! catch up. Every write is a blind overwrite or prepend-and-truncate.

mod memory;
mod redis_store;

pub use self::memory::InMemoryCache;
pub use self::redis_store::RedisEventCache;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::channels::{ttl, CacheKey, RECENT_ARBITRAGE_CAP};
use crate::events::PriceMovement;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache operation timed out")]
    Timeout,
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Key-value store with per-key expiry
#[async_trait]
pub trait EventCache: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set `key` and (re)start its expiry clock
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;
}

/// Typed access to the market keys on top of any [`EventCache`].
#[derive(Clone)]
pub struct MarketCache {
    store: Arc<dyn EventCache>,
}

impl MarketCache {
    pub fn new(store: Arc<dyn EventCache>) -> Self {
        Self { store }
    }

    /// Overwrite `market:{symbol}` with the movement's snapshot.
    pub async fn store_latest_price(&self, movement: &PriceMovement) -> CacheResult<()> {
        let value = serde_json::to_string(&movement.snapshot())?;
        self.store
            .set_ex(
                &CacheKey::latest_price(&movement.symbol),
                &value,
                Duration::from_secs(ttl::LATEST_PRICE),
            )
            .await
    }

    pub async fn latest_price(&self, symbol: &str) -> CacheResult<Option<Value>> {
        match self.store.get(&CacheKey::latest_price(symbol)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Prepend an alert, newest first, capped and with a refreshed TTL.
    ///
    /// An identical alert already in the list moves to the head instead of
    /// appearing twice, so log redelivery only rewrites the list.
    /// Returns the list length after the write.
    pub async fn push_recent_arbitrage(&self, alert: &Value) -> CacheResult<usize> {
        let mut alerts = self.recent_arbitrage().await?;

        alerts.retain(|existing| existing != alert);
        alerts.insert(0, alert.clone());
        alerts.truncate(RECENT_ARBITRAGE_CAP);

        let value = serde_json::to_string(&alerts)?;
        self.store
            .set_ex(
                CacheKey::recent_arbitrage(),
                &value,
                Duration::from_secs(ttl::RECENT_ARBITRAGE),
            )
            .await?;

        Ok(alerts.len())
    }

    /// Recent arbitrage alerts, newest first. A corrupt entry reads as empty
    /// and is replaced on the next write.
    pub async fn recent_arbitrage(&self) -> CacheResult<Vec<Value>> {
        let Some(raw) = self.store.get(CacheKey::recent_arbitrage()).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(alerts) => Ok(alerts),
            Err(e) => {
                warn!(key = CacheKey::recent_arbitrage(), error = %e, "Discarding corrupt alert list");
                Ok(Vec::new())
            }
        }
    }
}
