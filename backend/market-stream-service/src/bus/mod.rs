//! Publish/subscribe bus connecting ingestion to live sessions.
//!
//! Channels are fire-and-forget: a message published while nobody is
//! subscribed is gone. The cache covers that gap for late joiners.

mod memory;
mod redis_bus;

pub use self::memory::InMemoryBus;
pub use self::redis_bus::RedisBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Redis pub/sub error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Failed to encode bus payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Bus subscription closed")]
    Closed,
}

pub type BusResult<T> = Result<T, BusError>;

/// One message received on a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Live subscription. Dropping it releases the subscription.
pub type BusStream = BoxStream<'static, BusMessage>;

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a raw payload; returns how many subscribers received it.
    async fn publish(&self, channel: &str, payload: &str) -> BusResult<usize>;

    /// Subscribe to a fixed set of channels.
    async fn subscribe(&self, channels: &[String]) -> BusResult<BusStream>;

    /// Subscribe to every channel matching a `prefix*` pattern.
    async fn psubscribe(&self, pattern: &str) -> BusResult<BusStream>;
}

/// Serialize `frame` and publish it.
pub async fn publish_json<T: Serialize + Sync>(
    bus: &dyn EventBus,
    channel: &str,
    frame: &T,
) -> BusResult<usize> {
    let payload = serde_json::to_string(frame)?;
    bus.publish(channel, &payload).await
}

/// Glob match supporting `*` wildcards, as Redis `PSUBSCRIBE` does.
pub(crate) fn pattern_matches(pattern: &str, channel: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = channel.strip_prefix(first) else {
        return false;
    };

    let remaining: Vec<&str> = parts.collect();
    let Some((last, middle)) = remaining.split_last() else {
        // No wildcard at all: exact match
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("prices:*", "prices:AAPL"));
        assert!(pattern_matches("prices:*", "prices:"));
        assert!(!pattern_matches("prices:*", "alerts:user:1"));
        assert!(pattern_matches("alerts:*:1", "alerts:user:1"));
        assert!(!pattern_matches("alerts:*:1", "alerts:user:2"));
        assert!(pattern_matches("social:feed", "social:feed"));
        assert!(!pattern_matches("social:feed", "social:feed:2"));
        assert!(pattern_matches("*", "anything"));
    }
}
