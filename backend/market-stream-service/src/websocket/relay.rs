use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::bus::{BusError, EventBus};
use crate::channels::Channel;
use crate::websocket::registry::ConnectionRegistry;

/// Forward every `prices:{symbol}` message to the registry's subscribers of
/// that symbol.
///
/// Runs until `shutdown` fires. The bus subscription ending on its own is
/// an error: market sessions would silently stop updating.
pub async fn run_price_relay(
    bus: &dyn EventBus,
    registry: ConnectionRegistry,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BusError> {
    let pattern = Channel::prices_pattern();
    let mut stream = bus.psubscribe(&pattern).await?;
    info!(pattern = %pattern, "Price relay subscribed");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Price relay stopping");
                return Ok(());
            }
            message = stream.next() => {
                let Some(message) = message else {
                    return Err(BusError::Closed);
                };
                let Some(symbol) = Channel::symbol_of(&message.channel) else {
                    continue;
                };
                let report = registry.publish_to_symbol(symbol, &message.payload);
                debug!(
                    symbol,
                    delivered = report.delivered,
                    evicted = report.evicted,
                    "Relayed price update"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::events::UserId;
    use crate::websocket::registry::SessionId;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn test_relays_to_symbol_subscribers_only() {
        let bus = Arc::new(InMemoryBus::new());
        let registry = ConnectionRegistry::new();

        let (tx, mut rx) = unbounded_channel();
        let id = SessionId::new();
        registry.register(id, UserId::from("1"), tx);
        registry.subscribe(id, "AAPL");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let relay = tokio::spawn({
            let bus = bus.clone();
            let registry = registry.clone();
            async move { run_price_relay(bus.as_ref(), registry, shutdown_rx).await }
        });

        // Let the relay subscribe before publishing
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish("prices:MSFT", "msft").await.unwrap();
        bus.publish("prices:AAPL", "aapl").await.unwrap();
        bus.publish("alerts:broadcast", "noise").await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(received.as_deref(), Some("aapl"));

        shutdown_tx.send(true).unwrap();
        assert!(relay.await.unwrap().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
