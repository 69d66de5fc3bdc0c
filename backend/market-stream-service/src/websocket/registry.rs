use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::events::UserId;
use crate::metrics;

/// Unique identifier for a live session
///
/// Each connection gets its own id at registration, so a user with several
/// open sockets can have each one cleaned up precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Outbound queue of a session; the session's relay task drains it.
pub type SessionSender = UnboundedSender<String>;

struct SessionEntry {
    user_id: UserId,
    symbols: HashSet<String>,
    sender: SessionSender,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionId, SessionEntry>,
    by_user: HashMap<UserId, HashSet<SessionId>>,
    by_symbol: HashMap<String, HashSet<SessionId>>,
}

impl RegistryState {
    fn remove_session(&mut self, session_id: SessionId) -> bool {
        let Some(entry) = self.sessions.remove(&session_id) else {
            return false;
        };

        if let Some(sessions) = self.by_user.get_mut(&entry.user_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                self.by_user.remove(&entry.user_id);
            }
        }

        for symbol in &entry.symbols {
            if let Some(sessions) = self.by_symbol.get_mut(symbol) {
                sessions.remove(&session_id);
                if sessions.is_empty() {
                    self.by_symbol.remove(symbol);
                }
            }
        }

        true
    }

    /// Send to every listed session; evict the ones whose queue is gone.
    fn deliver<'a, I>(&mut self, targets: I, message: &str) -> DeliveryReport
    where
        I: IntoIterator<Item = &'a SessionId>,
    {
        let mut report = DeliveryReport::default();
        let mut dead = Vec::new();

        for session_id in targets {
            match self.sessions.get(session_id) {
                Some(entry) if entry.sender.send(message.to_string()).is_ok() => {
                    report.delivered += 1
                }
                _ => dead.push(*session_id),
            }
        }

        for session_id in dead {
            if self.remove_session(session_id) {
                report.evicted += 1;
            }
        }

        report
    }
}

/// Result of one fan-out call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Connection registry for live sessions
///
/// Indexes sessions by user and by symbol subscription. All mutation and
/// fan-out enumeration happen under one lock, so a session can never be added
/// to or removed from a symbol's set while that set is being delivered to.
/// Sends go to unbounded queues and never wait, which keeps the critical
/// sections short and free of await points.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new session. Returns `false` if the id is already registered.
    pub fn register(&self, session_id: SessionId, user_id: UserId, sender: SessionSender) -> bool {
        let mut state = self.inner.write();
        if state.sessions.contains_key(&session_id) {
            return false;
        }

        state
            .by_user
            .entry(user_id.clone())
            .or_default()
            .insert(session_id);
        state.sessions.insert(
            session_id,
            SessionEntry {
                user_id: user_id.clone(),
                symbols: HashSet::new(),
                sender,
            },
        );

        tracing::debug!(
            session_id = %session_id,
            user_id = %user_id,
            total_sessions = state.sessions.len(),
            "Registered session"
        );
        true
    }

    /// Remove a session from every index. Repeat calls are no-ops.
    ///
    /// Must run when a connection closes, or the session's queue leaks.
    pub fn unregister(&self, session_id: SessionId) -> bool {
        let mut state = self.inner.write();
        let removed = state.remove_session(session_id);
        if removed {
            tracing::debug!(
                session_id = %session_id,
                total_sessions = state.sessions.len(),
                "Unregistered session"
            );
        }
        removed
    }

    /// Add `symbol` to a session's subscriptions.
    ///
    /// Returns `false` for an unknown session or an existing subscription.
    pub fn subscribe(&self, session_id: SessionId, symbol: &str) -> bool {
        let mut state = self.inner.write();
        let Some(entry) = state.sessions.get_mut(&session_id) else {
            return false;
        };
        if !entry.symbols.insert(symbol.to_string()) {
            return false;
        }

        state
            .by_symbol
            .entry(symbol.to_string())
            .or_default()
            .insert(session_id);
        true
    }

    /// Drop `symbol` from a session's subscriptions. Returns `false` if it
    /// was not subscribed.
    pub fn unsubscribe(&self, session_id: SessionId, symbol: &str) -> bool {
        let mut state = self.inner.write();
        let Some(entry) = state.sessions.get_mut(&session_id) else {
            return false;
        };
        if !entry.symbols.remove(symbol) {
            return false;
        }

        if let Some(sessions) = state.by_symbol.get_mut(symbol) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                state.by_symbol.remove(symbol);
            }
        }
        true
    }

    /// Deliver to every session of a user
    pub fn publish_to_user(&self, user_id: &UserId, message: &str) -> DeliveryReport {
        let mut state = self.inner.write();
        let Some(targets) = state.by_user.get(user_id).cloned() else {
            return DeliveryReport::default();
        };
        let report = state.deliver(&targets, message);
        drop(state);

        record_evictions(report, "user", user_id.as_str());
        report
    }

    /// Deliver to every session subscribed to a symbol
    pub fn publish_to_symbol(&self, symbol: &str, message: &str) -> DeliveryReport {
        let mut state = self.inner.write();
        let Some(targets) = state.by_symbol.get(symbol).cloned() else {
            return DeliveryReport::default();
        };
        let report = state.deliver(&targets, message);
        drop(state);

        record_evictions(report, "symbol", symbol);
        report
    }

    pub fn is_registered(&self, session_id: SessionId) -> bool {
        self.inner.read().sessions.contains_key(&session_id)
    }

    /// Current subscriptions of a session, sorted
    pub fn subscriptions(&self, session_id: SessionId) -> Vec<String> {
        let state = self.inner.read();
        let mut symbols: Vec<String> = state
            .sessions
            .get(&session_id)
            .map(|entry| entry.symbols.iter().cloned().collect())
            .unwrap_or_default();
        symbols.sort();
        symbols
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn user_count(&self) -> usize {
        self.inner.read().by_user.len()
    }

    /// Live sessions of one user
    pub fn connection_count(&self, user_id: &UserId) -> usize {
        self.inner
            .read()
            .by_user
            .get(user_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, symbol: &str) -> usize {
        self.inner
            .read()
            .by_symbol
            .get(symbol)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Number of symbols with at least one subscriber
    pub fn symbol_count(&self) -> usize {
        self.inner.read().by_symbol.len()
    }
}

fn record_evictions(report: DeliveryReport, scope: &str, key: &str) {
    if report.evicted > 0 {
        metrics::record_evictions(report.evicted);
        tracing::debug!(
            scope,
            key,
            evicted = report.evicted,
            delivered = report.delivered,
            "Evicted dead sessions during fan-out"
        );
    }
}
