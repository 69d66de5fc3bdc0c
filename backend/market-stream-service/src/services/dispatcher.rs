//! Best-effort push notification fan-out.
//!
//! Pushes are a side channel to the live streams: a failed push is logged and
//! counted, never retried and never propagated to the ingestion loop.

use std::sync::Arc;

use async_trait::async_trait;
use fcm_push::{FcmClient, FcmError, PushNotification};
use thiserror::Error;
use tracing::{debug, warn};

use crate::channels::PushTopic;
use crate::events::UserId;
use crate::metrics;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push notifications are not configured")]
    Disabled,

    #[error(transparent)]
    Fcm(#[from] FcmError),
}

/// Anything that can deliver a push to a topic or to one user.
#[async_trait]
pub trait PushSink: Send + Sync {
    async fn push_to_topic(
        &self,
        topic: &str,
        notification: &PushNotification,
    ) -> Result<(), PushError>;

    async fn push_to_user(
        &self,
        user_id: &UserId,
        notification: &PushNotification,
    ) -> Result<(), PushError>;
}

#[async_trait]
impl PushSink for FcmClient {
    async fn push_to_topic(
        &self,
        topic: &str,
        notification: &PushNotification,
    ) -> Result<(), PushError> {
        let result = self.send_to_topic(topic, notification).await?;
        debug!(topic, message_id = %result.message_id, "FCM topic message sent");
        Ok(())
    }

    /// Devices subscribe themselves to `user_<id>` at login.
    async fn push_to_user(
        &self,
        user_id: &UserId,
        notification: &PushNotification,
    ) -> Result<(), PushError> {
        let topic = PushTopic::user(user_id);
        let result = self.send_to_topic(&topic, notification).await?;
        debug!(user_id = %user_id, message_id = %result.message_id, "FCM user message sent");
        Ok(())
    }
}

/// Used when no FCM credentials are configured.
pub struct DisabledPushSink;

#[async_trait]
impl PushSink for DisabledPushSink {
    async fn push_to_topic(&self, _: &str, _: &PushNotification) -> Result<(), PushError> {
        Err(PushError::Disabled)
    }

    async fn push_to_user(&self, _: &UserId, _: &PushNotification) -> Result<(), PushError> {
        Err(PushError::Disabled)
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    sink: Arc<dyn PushSink>,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn PushSink>) -> Self {
        Self { sink }
    }

    /// Push to every device following `topic`. Returns whether the sink
    /// accepted it.
    pub async fn notify_broadcast(&self, topic: &str, notification: &PushNotification) -> bool {
        match self.sink.push_to_topic(topic, notification).await {
            Ok(()) => {
                metrics::record_push("broadcast", true);
                true
            }
            Err(e) => {
                metrics::record_push("broadcast", false);
                warn!(topic, error = %e, "Broadcast push failed");
                false
            }
        }
    }

    pub async fn notify_user(&self, user_id: &UserId, notification: &PushNotification) -> bool {
        match self.sink.push_to_user(user_id, notification).await {
            Ok(()) => {
                metrics::record_push("user", true);
                true
            }
            Err(e) => {
                metrics::record_push("user", false);
                warn!(user_id = %user_id, error = %e, "User push failed");
                false
            }
        }
    }

    /// Sequential per-user pushes; returns how many succeeded.
    pub async fn notify_users(&self, users: &[UserId], notification: &PushNotification) -> usize {
        let mut delivered = 0;
        for user_id in users {
            if self.notify_user(user_id, notification).await {
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FlakySink {
        failing_users: Vec<UserId>,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushSink for FlakySink {
        async fn push_to_topic(
            &self,
            topic: &str,
            _: &PushNotification,
        ) -> Result<(), PushError> {
            self.sent.lock().push(topic.to_string());
            Ok(())
        }

        async fn push_to_user(
            &self,
            user_id: &UserId,
            _: &PushNotification,
        ) -> Result<(), PushError> {
            if self.failing_users.contains(user_id) {
                return Err(PushError::Disabled);
            }
            self.sent.lock().push(user_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_disabled_sink_reports_failure() {
        let dispatcher = NotificationDispatcher::new(Arc::new(DisabledPushSink));
        let notification = PushNotification::new("t", "b");

        assert!(!dispatcher.notify_broadcast("arbitrage_alerts", &notification).await);
        assert!(!dispatcher.notify_user(&UserId::from("1"), &notification).await);
    }

    #[tokio::test]
    async fn test_notify_users_counts_successes() {
        let sink = Arc::new(FlakySink {
            failing_users: vec![UserId::from("2")],
            ..Default::default()
        });
        let dispatcher = NotificationDispatcher::new(sink.clone());
        let users: Vec<UserId> = ["1", "2", "3"].into_iter().map(UserId::from).collect();

        let delivered = dispatcher
            .notify_users(&users, &PushNotification::new("t", "b"))
            .await;

        assert_eq!(delivered, 2);
        assert_eq!(*sink.sent.lock(), vec!["1".to_string(), "3".to_string()]);
    }
}
