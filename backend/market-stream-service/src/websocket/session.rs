//! Live session multiplexer.
//!
//! A session is authenticated once, then split into two cooperating tasks:
//! the reader (this task) handles client frames, the relay task drains the
//! session's registry queue and bus subscription onto the socket. A
//! `watch` channel tells the relay to stop; the relay finishing tells the
//! reader to stop. Registration is owned by a drop guard, so the registry
//! is cleaned up on every exit path, including cancellation.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::auth::TokenDecoder;
use crate::bus::{BusMessage, BusStream, EventBus};
use crate::cache::MarketCache;
use crate::channels::Channel;
use crate::config::SessionConfig;
use crate::error::AuthError;
use crate::events::{normalize_symbol, UserId};
use crate::metrics;
use crate::websocket::message_types::{ControlAction, ControlFrame, OutboundFrame};
use crate::websocket::registry::{ConnectionRegistry, SessionId};

/// Close codes used by the server
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL: u16 = 1002;
    pub const INTERNAL: u16 = 1011;
    /// Application range: bad or expired credentials
    pub const INVALID_TOKEN: u16 = 4001;
}

#[derive(Debug, Error)]
#[error("transport closed")]
pub struct TransportClosed;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Client frame, reduced to what the multiplexer acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Ping(Vec<u8>),
    Pong,
    Close,
    /// Binary and continuation frames; they only count as liveness
    Other,
}

/// Write half of a socket.
///
/// Clones share the same underlying connection, so the reader and the relay
/// can each hold one.
#[async_trait(?Send)]
pub trait SessionTransport: Clone + 'static {
    async fn send_text(&mut self, text: String) -> Result<(), TransportClosed>;

    async fn ping(&mut self) -> Result<(), TransportClosed>;

    async fn pong(&mut self, payload: &[u8]) -> Result<(), TransportClosed>;

    /// Send a close frame. Errors are ignored; the socket is going away.
    async fn close(self, code: u16, reason: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFlavor {
    /// Client-driven symbol subscriptions
    Market,
    /// Per-user and broadcast alerts
    Alerts,
    Social,
}

impl StreamFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamFlavor::Market => "market",
            StreamFlavor::Alerts => "alerts",
            StreamFlavor::Social => "social",
        }
    }

    /// Fixed bus channels attached at connect time
    pub fn channels(&self, user_id: &UserId) -> Vec<String> {
        match self {
            StreamFlavor::Market => Vec::new(),
            StreamFlavor::Alerts => vec![
                Channel::user_alerts(user_id),
                Channel::broadcast_alerts().to_string(),
            ],
            StreamFlavor::Social => vec![Channel::social_feed().to_string()],
        }
    }
}

/// Why an authenticated session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    ClientClosed,
    TransportEnded,
    ProtocolError,
    SendFailed,
    HeartbeatTimeout,
    /// The bus subscription dropped out from under the session
    UpstreamClosed,
}

impl CloseCause {
    fn close_frame(&self) -> (u16, &'static str) {
        match self {
            CloseCause::ClientClosed | CloseCause::TransportEnded => {
                (close_code::NORMAL, "Closing")
            }
            CloseCause::ProtocolError => (close_code::PROTOCOL, "Protocol error"),
            CloseCause::SendFailed => (close_code::INTERNAL, "Send failed"),
            CloseCause::HeartbeatTimeout => (close_code::GOING_AWAY, "Heartbeat timeout"),
            CloseCause::UpstreamClosed => (close_code::INTERNAL, "Upstream unavailable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Closed with 4001 before registration
    Rejected(AuthError),
    /// Closed with 1011 before registration
    SubscribeFailed,
    Closed(CloseCause),
}

/// Shared dependencies of every session
#[derive(Clone)]
pub struct SessionContext {
    pub registry: ConnectionRegistry,
    pub cache: MarketCache,
    pub bus: Arc<dyn EventBus>,
    pub decoder: Arc<TokenDecoder>,
    pub config: SessionConfig,
}

/// Owns a registry entry for the lifetime of a session.
struct RegistrationGuard {
    registry: ConnectionRegistry,
    session_id: SessionId,
    flavor: StreamFlavor,
}

impl RegistrationGuard {
    fn register(
        registry: &ConnectionRegistry,
        session_id: SessionId,
        user_id: UserId,
        sender: UnboundedSender<String>,
        flavor: StreamFlavor,
    ) -> Self {
        registry.register(session_id, user_id, sender);
        metrics::session_opened(flavor.as_str());
        Self {
            registry: registry.clone(),
            session_id,
            flavor,
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.session_id);
        metrics::session_closed(self.flavor.as_str());
    }
}

/// Drive one socket from handshake to close.
///
/// Must run on a local task set (an actix worker or `#[actix_web::test]`):
/// the relay is spawned with `actix_web::rt::spawn`.
pub async fn run_session<T, S>(
    ctx: SessionContext,
    flavor: StreamFlavor,
    token: Option<String>,
    mut transport: T,
    mut inbound: S,
) -> SessionOutcome
where
    T: SessionTransport,
    S: Stream<Item = Result<InboundFrame, TransportError>> + Unpin,
{
    let decoded = match token.as_deref() {
        Some(token) => ctx.decoder.decode(token),
        None => Err(AuthError::MissingToken),
    };
    let identity = match decoded {
        Ok(identity) => identity,
        Err(e) => {
            metrics::session_rejected();
            warn!(flavor = flavor.as_str(), error = %e, "Rejecting WebSocket session");
            transport.close(close_code::INVALID_TOKEN, "Invalid token").await;
            return SessionOutcome::Rejected(e);
        }
    };
    let user_id = identity.user_id;

    let channels = flavor.channels(&user_id);
    let bus_stream = if channels.is_empty() {
        None
    } else {
        match ctx.bus.subscribe(&channels).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Bus subscription failed");
                transport
                    .close(close_code::INTERNAL, "Subscription failed")
                    .await;
                return SessionOutcome::SubscribeFailed;
            }
        }
    };

    let session_id = SessionId::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let guard = RegistrationGuard::register(
        &ctx.registry,
        session_id,
        user_id.clone(),
        tx.clone(),
        flavor,
    );
    info!(
        session_id = %session_id,
        user_id = %user_id,
        flavor = flavor.as_str(),
        "WebSocket session active"
    );

    let last_seen = Rc::new(Cell::new(Instant::now()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut relay_task = actix_web::rt::spawn(relay_outbound(
        transport.clone(),
        rx,
        bus_stream,
        last_seen.clone(),
        ctx.config,
        shutdown_rx,
    ));

    let mut relay_cause = None;
    let cause = loop {
        tokio::select! {
            frame = inbound.next() => {
                match frame {
                    Some(Ok(InboundFrame::Text(text))) => {
                        last_seen.set(Instant::now());
                        if flavor == StreamFlavor::Market {
                            handle_control(&ctx, session_id, &text, &tx).await;
                        }
                    }
                    Some(Ok(InboundFrame::Ping(payload))) => {
                        last_seen.set(Instant::now());
                        if transport.pong(&payload).await.is_err() {
                            break CloseCause::SendFailed;
                        }
                    }
                    Some(Ok(InboundFrame::Pong | InboundFrame::Other)) => {
                        last_seen.set(Instant::now());
                    }
                    Some(Ok(InboundFrame::Close)) => break CloseCause::ClientClosed,
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, error = %e, "WebSocket protocol error");
                        break CloseCause::ProtocolError;
                    }
                    None => break CloseCause::TransportEnded,
                }
            }
            exit = &mut relay_task => {
                let cause = exit.ok().flatten().unwrap_or(CloseCause::SendFailed);
                relay_cause = Some(cause);
                break cause;
            }
        }
    };

    if relay_cause.is_none() {
        let _ = shutdown_tx.send(true);
        let _ = relay_task.await;
    }

    let (code, reason) = cause.close_frame();
    transport.close(code, reason).await;
    drop(guard);

    info!(
        session_id = %session_id,
        user_id = %user_id,
        flavor = flavor.as_str(),
        cause = ?cause,
        "WebSocket session closed"
    );
    SessionOutcome::Closed(cause)
}

/// Outbound half. Returns `None` when told to stop, or the reason it gave up.
async fn relay_outbound<T: SessionTransport>(
    mut transport: T,
    mut rx: UnboundedReceiver<String>,
    mut bus: Option<BusStream>,
    last_seen: Rc<Cell<Instant>>,
    config: SessionConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Option<CloseCause> {
    let mut heartbeat = time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return None,
            queued = rx.recv() => {
                let Some(text) = queued else {
                    return None;
                };
                if transport.send_text(text).await.is_err() {
                    return Some(CloseCause::SendFailed);
                }
            }
            message = next_bus_message(&mut bus) => {
                let Some(message) = message else {
                    return Some(CloseCause::UpstreamClosed);
                };
                if transport.send_text(message.payload).await.is_err() {
                    return Some(CloseCause::SendFailed);
                }
            }
            _ = heartbeat.tick() => {
                if last_seen.get().elapsed() > config.client_timeout {
                    return Some(CloseCause::HeartbeatTimeout);
                }
                if transport.ping().await.is_err() {
                    return Some(CloseCause::SendFailed);
                }
            }
        }
    }
}

async fn next_bus_message(bus: &mut Option<BusStream>) -> Option<BusMessage> {
    match bus {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Apply a subscribe/unsubscribe frame. Anything else is ignored.
async fn handle_control(
    ctx: &SessionContext,
    session_id: SessionId,
    text: &str,
    tx: &UnboundedSender<String>,
) {
    let frame: ControlFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(session_id = %session_id, error = %e, "Ignoring unparsable control frame");
            return;
        }
    };
    let Some(action) = frame.action() else {
        debug!(session_id = %session_id, action = %frame.action, "Ignoring unknown action");
        return;
    };

    let mut symbols: Vec<String> = Vec::with_capacity(frame.symbols.len());
    for symbol in frame.symbols.iter().map(|s| normalize_symbol(s)) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }

    match action {
        ControlAction::Subscribe => {
            for symbol in &symbols {
                ctx.registry.subscribe(session_id, symbol);
            }
            let _ = tx.send(
                OutboundFrame::Subscribed {
                    symbols: symbols.clone(),
                }
                .to_json(),
            );

            // Late joiners get the last known price right away
            for symbol in symbols {
                match ctx.cache.latest_price(&symbol).await {
                    Ok(Some(data)) => {
                        let _ = tx.send(OutboundFrame::Quote { symbol, data }.to_json());
                    }
                    Ok(None) => {}
                    Err(e) => warn!(symbol = %symbol, error = %e, "Snapshot lookup failed"),
                }
            }
        }
        ControlAction::Unsubscribe => {
            for symbol in &symbols {
                ctx.registry.unsubscribe(session_id, symbol);
            }
            let _ = tx.send(OutboundFrame::Unsubscribed { symbols }.to_json());
        }
    }
}
