//! Shared fakes for integration tests
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fcm_push::PushNotification;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::json;

use market_stream_service::auth::TokenDecoder;
use market_stream_service::bus::{BusResult, BusStream, EventBus, InMemoryBus};
use market_stream_service::cache::{CacheError, CacheResult, EventCache, InMemoryCache, MarketCache};
use market_stream_service::config::SessionConfig;
use market_stream_service::events::UserId;
use market_stream_service::services::{PushError, PushSink};
use market_stream_service::websocket::{
    ConnectionRegistry, SessionContext, SessionTransport, TransportClosed,
};

pub const SECRET: &str = "integration-secret";

pub fn token_for(user_id: u64) -> String {
    let claims = json!({
        "sub": user_id,
        "exp": Utc::now().timestamp() + 3600,
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn decoder() -> Arc<TokenDecoder> {
    Arc::new(TokenDecoder::new(SECRET, Algorithm::HS256))
}

pub fn memory_cache() -> MarketCache {
    MarketCache::new(Arc::new(InMemoryCache::new()))
}

/// Poll `check` until it holds, or fail after ~2s.
pub async fn eventually<F: Fn() -> bool>(check: F, what: &str) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}

// ==================== Push sink ====================

#[derive(Debug, Clone, PartialEq)]
pub enum PushCall {
    Topic(String, PushNotification),
    User(UserId, PushNotification),
}

#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<PushCall>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<PushCall> {
        self.calls.lock().clone()
    }

    pub fn topic_calls(&self) -> Vec<(String, PushNotification)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PushCall::Topic(topic, notification) => Some((topic, notification)),
                PushCall::User(..) => None,
            })
            .collect()
    }

    pub fn user_calls(&self) -> Vec<UserId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PushCall::User(user_id, _) => Some(user_id),
                PushCall::Topic(..) => None,
            })
            .collect()
    }
}

#[async_trait]
impl PushSink for RecordingSink {
    async fn push_to_topic(
        &self,
        topic: &str,
        notification: &PushNotification,
    ) -> Result<(), PushError> {
        self.calls
            .lock()
            .push(PushCall::Topic(topic.to_string(), notification.clone()));
        Ok(())
    }

    async fn push_to_user(
        &self,
        user_id: &UserId,
        notification: &PushNotification,
    ) -> Result<(), PushError> {
        self.calls
            .lock()
            .push(PushCall::User(user_id.clone(), notification.clone()));
        Ok(())
    }
}

// ==================== Bus ====================

/// In-memory bus that also remembers every publish
#[derive(Default)]
pub struct RecordingBus {
    inner: InMemoryBus,
    published: Mutex<Vec<(String, String)>>,
}

impl RecordingBus {
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    pub fn published_to(&self, prefix: &str) -> Vec<(String, String)> {
        self.published()
            .into_iter()
            .filter(|(channel, _)| channel.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, channel: &str, payload: &str) -> BusResult<usize> {
        self.published
            .lock()
            .push((channel.to_string(), payload.to_string()));
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channels: &[String]) -> BusResult<BusStream> {
        self.inner.subscribe(channels).await
    }

    async fn psubscribe(&self, pattern: &str) -> BusResult<BusStream> {
        self.inner.psubscribe(pattern).await
    }
}

// ==================== Cache ====================

/// Cache whose backend is unreachable
pub struct UnreachableCache;

#[async_trait]
impl EventCache for UnreachableCache {
    async fn get(&self, _: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Timeout)
    }

    async fn set_ex(&self, _: &str, _: &str, _: Duration) -> CacheResult<()> {
        Err(CacheError::Timeout)
    }
}

// ==================== Transport ====================

#[derive(Debug, Default)]
pub struct TransportLog {
    pub sent: Vec<String>,
    pub pings: usize,
    pub pongs: usize,
    pub closed: Option<(u16, String)>,
    /// Makes every later `send_text` fail, like a peer that went away
    pub broken: bool,
}

/// Records everything the server writes to the socket
#[derive(Clone, Default)]
pub struct RecordingTransport {
    log: Rc<RefCell<TransportLog>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<String> {
        self.log.borrow().sent.clone()
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub fn pings(&self) -> usize {
        self.log.borrow().pings
    }

    pub fn pongs(&self) -> usize {
        self.log.borrow().pongs
    }

    pub fn closed(&self) -> Option<(u16, String)> {
        self.log.borrow().closed.clone()
    }

    pub fn break_sends(&self) {
        self.log.borrow_mut().broken = true;
    }
}

#[async_trait(?Send)]
impl SessionTransport for RecordingTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportClosed> {
        let mut log = self.log.borrow_mut();
        if log.closed.is_some() || log.broken {
            return Err(TransportClosed);
        }
        log.sent.push(text);
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), TransportClosed> {
        self.log.borrow_mut().pings += 1;
        Ok(())
    }

    async fn pong(&mut self, _: &[u8]) -> Result<(), TransportClosed> {
        self.log.borrow_mut().pongs += 1;
        Ok(())
    }

    async fn close(self, code: u16, reason: &str) {
        self.log.borrow_mut().closed = Some((code, reason.to_string()));
    }
}

pub fn session_context(bus: Arc<dyn EventBus>, cache: MarketCache) -> SessionContext {
    SessionContext {
        registry: ConnectionRegistry::new(),
        cache,
        bus,
        decoder: decoder(),
        config: SessionConfig::default(),
    }
}
