use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, Client, Msg};
use tracing::{debug, warn};

use super::{BusMessage, BusResult, BusStream, EventBus};
use crate::redis_client::SharedConnectionManager;

/// [`EventBus`] over Redis pub/sub.
///
/// Publishes share the command connection; every subscription opens its own
/// dedicated pub/sub connection, closed when the stream is dropped.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    publisher: SharedConnectionManager,
}

impl RedisBus {
    pub fn new(client: Client, publisher: SharedConnectionManager) -> Self {
        Self { client, publisher }
    }
}

fn into_bus_message(msg: Msg) -> Option<BusMessage> {
    let channel = msg.get_channel_name().to_string();
    match msg.get_payload::<String>() {
        Ok(payload) => Some(BusMessage { channel, payload }),
        Err(e) => {
            warn!(channel = %channel, error = %e, "Dropping non-text bus payload");
            None
        }
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> BusResult<usize> {
        let mut conn = self.publisher.lock().await;
        let receivers: usize = conn.publish(channel, payload).await?;
        debug!(channel = %channel, receivers, "Published to bus");
        Ok(receivers)
    }

    async fn subscribe(&self, channels: &[String]) -> BusResult<BusStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels {
            pubsub.subscribe(channel).await?;
        }
        debug!(channels = ?channels, "Opened bus subscription");

        Ok(pubsub
            .into_on_message()
            .filter_map(|msg| futures::future::ready(into_bus_message(msg)))
            .boxed())
    }

    async fn psubscribe(&self, pattern: &str) -> BusResult<BusStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;
        debug!(pattern = %pattern, "Opened bus pattern subscription");

        Ok(pubsub
            .into_on_message()
            .filter_map(|msg| futures::future::ready(into_bus_message(msg)))
            .boxed())
    }
}
