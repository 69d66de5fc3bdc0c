use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashSet;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::warn;

use super::{pattern_matches, BusMessage, BusResult, BusStream, EventBus};

const DEFAULT_CAPACITY: usize = 1024;

/// Process-local [`EventBus`] over a tokio broadcast channel.
///
/// Every subscriber sees every message and filters by channel name, which
/// is fine for tests and single-node development. Slow subscribers that lag
/// past the buffer skip the missed messages, like a Redis client would.
#[derive(Clone)]
pub struct InMemoryBus {
    tx: broadcast::Sender<BusMessage>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    fn filtered<F>(&self, keep: F) -> BusStream
    where
        F: Fn(&str) -> bool + Send + 'static,
    {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(move |received| {
                let message = match received {
                    Ok(message) if keep(&message.channel) => Some(message),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "In-memory bus subscriber lagged");
                        None
                    }
                };
                futures::future::ready(message)
            })
            .boxed()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> BusResult<usize> {
        let message = BusMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        // Err only means nobody is listening right now.
        Ok(self.tx.send(message).unwrap_or(0))
    }

    async fn subscribe(&self, channels: &[String]) -> BusResult<BusStream> {
        let wanted: HashSet<String> = channels.iter().cloned().collect();
        Ok(self.filtered(move |channel| wanted.contains(channel)))
    }

    async fn psubscribe(&self, pattern: &str) -> BusResult<BusStream> {
        let pattern = pattern.to_string();
        Ok(self.filtered(move |channel| pattern_matches(&pattern, channel)))
    }
}
