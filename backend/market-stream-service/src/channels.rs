//! Names shared with producers, clients and the push provider.
//!
//! Cache keys, bus channels and push topics all live here so every
//! component builds them the same way.

use crate::events::UserId;

/// Cache TTLs (seconds)
pub mod ttl {
    pub const LATEST_PRICE: u64 = 60;
    pub const RECENT_ARBITRAGE: u64 = 3600;
}

/// Maximum length of the recent arbitrage list
pub const RECENT_ARBITRAGE_CAP: usize = 100;

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Latest price snapshot for a symbol
    /// Format: market:{symbol}
    pub fn latest_price(symbol: &str) -> String {
        format!("market:{}", symbol)
    }

    /// Bounded newest-first list of arbitrage alerts
    pub fn recent_arbitrage() -> &'static str {
        "alerts:arbitrage:recent"
    }
}

/// Bus channel builder
pub struct Channel;

impl Channel {
    pub const PRICE_PREFIX: &'static str = "prices:";
    pub const USER_ALERT_PREFIX: &'static str = "alerts:user:";

    /// Per-symbol price updates
    /// Format: prices:{symbol}
    pub fn prices(symbol: &str) -> String {
        format!("{}{}", Self::PRICE_PREFIX, symbol)
    }

    /// Pattern matching every price channel
    pub fn prices_pattern() -> String {
        format!("{}*", Self::PRICE_PREFIX)
    }

    /// Per-user alert delivery
    /// Format: alerts:user:{user_id}
    pub fn user_alerts(user_id: &UserId) -> String {
        format!("{}{}", Self::USER_ALERT_PREFIX, user_id)
    }

    /// Alerts addressed to every user
    pub fn broadcast_alerts() -> &'static str {
        "alerts:broadcast"
    }

    /// Social activity feed
    pub fn social_feed() -> &'static str {
        "social:feed"
    }

    /// Symbol carried by a `prices:{symbol}` channel name
    pub fn symbol_of(channel: &str) -> Option<&str> {
        channel
            .strip_prefix(Self::PRICE_PREFIX)
            .filter(|symbol| !symbol.is_empty())
    }
}

/// Push-notification topic builder (consumed by FCM, not the bus)
pub struct PushTopic;

impl PushTopic {
    pub fn arbitrage() -> &'static str {
        "arbitrage_alerts"
    }

    /// Format: symbol_{lowercased symbol}
    pub fn symbol(symbol: &str) -> String {
        format!("symbol_{}", symbol.to_lowercase())
    }

    /// Format: user_{user_id}
    pub fn user(user_id: &UserId) -> String {
        format!("user_{}", user_id)
    }
}
