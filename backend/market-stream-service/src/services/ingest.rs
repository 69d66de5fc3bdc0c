//! Per-record ingestion pipeline.
//!
//! normalize -> cache write-through -> significance gate -> targeting ->
//! bus publish + push notification

use std::sync::Arc;

use async_trait::async_trait;
use fcm_push::PushNotification;
use tracing::{debug, info, warn};

use crate::bus::{publish_json, EventBus};
use crate::cache::MarketCache;
use crate::channels::{Channel, PushTopic};
use crate::error::IngestError;
use crate::events::{ArbitrageAlert, EventKind, MarketEvent, PriceMovement, Target, UserId};
use crate::services::dispatcher::NotificationDispatcher;
use crate::websocket::OutboundFrame;

/// What one processed record produced
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessReport {
    /// Bus messages published
    pub published: usize,
    /// Push notifications the sink accepted
    pub pushed: usize,
    /// Accepted but routed nowhere
    pub skipped: bool,
}

/// Handles one raw log record at a time.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Label used in logs and metrics
    fn name(&self) -> &str;

    async fn process(&self, raw: &[u8]) -> Result<ProcessReport, IngestError>;
}

/// Routes normalized events to the cache, the bus and the push dispatcher.
pub struct EventRouter {
    kind: EventKind,
    cache: MarketCache,
    bus: Arc<dyn EventBus>,
    dispatcher: NotificationDispatcher,
}

impl EventRouter {
    pub fn new(
        kind: EventKind,
        cache: MarketCache,
        bus: Arc<dyn EventBus>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            kind,
            cache,
            bus,
            dispatcher,
        }
    }

    async fn handle_arbitrage(&self, alert: ArbitrageAlert) -> Result<ProcessReport, IngestError> {
        let mut report = ProcessReport::default();

        let recent = self.cache.push_recent_arbitrage(&alert.payload).await?;
        debug!(symbol = %alert.symbol, recent, "Cached arbitrage alert");

        let frame = OutboundFrame::Arbitrage {
            data: alert.payload.clone(),
        };
        let description = if alert.description.is_empty() {
            "New opportunity detected"
        } else {
            alert.description.as_str()
        };
        let notification = PushNotification::new("🎯 Arbitrage Opportunity", description)
            .with_data("symbol", alert.symbol.clone())
            .with_data("type", "arbitrage");

        match &alert.target {
            Target::All => {
                publish_json(self.bus.as_ref(), Channel::broadcast_alerts(), &frame).await?;
                report.published += 1;
                if self
                    .dispatcher
                    .notify_broadcast(PushTopic::arbitrage(), &notification)
                    .await
                {
                    report.pushed += 1;
                }
            }
            Target::Users(users) => {
                report.published += self.publish_to_users(users, &frame).await?;
                report.pushed += self.dispatcher.notify_users(users, &notification).await;
            }
        }

        info!(
            symbol = %alert.symbol,
            potential_profit = alert.potential_profit,
            confidence = alert.confidence,
            published = report.published,
            pushed = report.pushed,
            "Processed arbitrage alert"
        );
        Ok(report)
    }

    async fn handle_price(&self, movement: PriceMovement) -> Result<ProcessReport, IngestError> {
        let mut report = ProcessReport::default();

        // Every cache key and channel is keyed by symbol
        if movement.symbol.is_empty() {
            warn!(
                new_price = movement.new_price,
                change_percent = movement.change_percent,
                "Price movement without symbol, not routed"
            );
            report.skipped = true;
            return Ok(report);
        }

        self.cache.store_latest_price(&movement).await?;

        let update = OutboundFrame::PriceUpdate {
            symbol: movement.symbol.clone(),
            data: movement.payload.clone(),
        };
        publish_json(self.bus.as_ref(), &Channel::prices(&movement.symbol), &update).await?;
        report.published += 1;

        if !movement.is_significant() {
            debug!(
                symbol = %movement.symbol,
                change_percent = movement.change_percent,
                "Price move below alert threshold"
            );
            return Ok(report);
        }

        let notification = price_alert_notification(&movement);
        match &movement.target {
            None | Some(Target::All) => {
                let topic = PushTopic::symbol(&movement.symbol);
                if self.dispatcher.notify_broadcast(&topic, &notification).await {
                    report.pushed += 1;
                }
            }
            Some(Target::Users(users)) => {
                let alert = OutboundFrame::PriceAlert {
                    symbol: movement.symbol.clone(),
                    data: movement.payload.clone(),
                };
                report.published += self.publish_to_users(users, &alert).await?;
                report.pushed += self.dispatcher.notify_users(users, &notification).await;
            }
        }

        info!(
            symbol = %movement.symbol,
            change_percent = movement.change_percent,
            new_price = movement.new_price,
            pushed = report.pushed,
            "Processed significant price movement"
        );
        Ok(report)
    }

    async fn publish_to_users(
        &self,
        users: &[UserId],
        frame: &OutboundFrame,
    ) -> Result<usize, IngestError> {
        for user_id in users {
            publish_json(self.bus.as_ref(), &Channel::user_alerts(user_id), frame).await?;
        }
        Ok(users.len())
    }
}

#[async_trait]
impl EventProcessor for EventRouter {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn process(&self, raw: &[u8]) -> Result<ProcessReport, IngestError> {
        match MarketEvent::normalize(self.kind, raw)? {
            MarketEvent::Arbitrage(alert) => self.handle_arbitrage(alert).await,
            MarketEvent::PriceMovement(movement) => self.handle_price(movement).await,
        }
    }
}

fn price_alert_notification(movement: &PriceMovement) -> PushNotification {
    let arrow = if movement.change_percent >= 0.0 {
        "📈"
    } else {
        "📉"
    };
    let title = format!("{} {} Alert", arrow, movement.symbol);
    let body = format!(
        "{} moved {:+.2}% to ${:.2}",
        movement.symbol, movement.change_percent, movement.new_price
    );

    PushNotification::new(title, body)
        .with_data("symbol", movement.symbol.clone())
        .with_data("type", "price_alert")
        .with_data("change_percent", movement.change_percent.to_string())
}
