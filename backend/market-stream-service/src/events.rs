//! Normalized market events.
//!
//! Upstream producers publish loosely-typed JSON. Everything is validated
//! here, once, at the ingestion boundary: missing fields fall back to zero
//! or empty, and only payloads that are not JSON objects are rejected.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::error::IngestError;

/// Line movements at or beyond this magnitude (percent) trigger push fan-out.
pub const SIGNIFICANT_MOVE_PERCENT: f64 = 2.0;

/// Opaque user identity. `42` and `"42"` name the same user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Accepts integer numbers and non-empty strings.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_string())),
            Value::Number(n) => n
                .as_i64()
                .map(|i| i.to_string())
                .or_else(|| n.as_u64().map(|u| u.to_string()))
                .map(Self),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.trim().to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

/// Who an event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Sentinel `"all"`
    All,
    /// Explicit identities, deduplicated, in producer order
    Users(Vec<UserId>),
}

impl Target {
    /// `None` when the field is absent or carries nothing usable.
    fn from_json(value: Option<&Value>) -> Option<Self> {
        match value? {
            Value::String(s) if s.trim().eq_ignore_ascii_case("all") => Some(Target::All),
            Value::Array(items) => {
                let mut users: Vec<UserId> = Vec::with_capacity(items.len());
                for user in items.iter().filter_map(UserId::from_json) {
                    if !users.contains(&user) {
                        users.push(user);
                    }
                }
                Some(Target::Users(users))
            }
            single @ (Value::String(_) | Value::Number(_)) => {
                UserId::from_json(single).map(|user| Target::Users(vec![user]))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Arbitrage,
    PriceMovement,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Arbitrage => "arbitrage",
            EventKind::PriceMovement => "price_movement",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrageAlert {
    pub symbol: String,
    pub description: String,
    pub potential_profit: f64,
    pub confidence: f64,
    /// Defaults to `All` when the producer leaves it out
    pub target: Target,
    /// Producer payload, relayed to clients as-is
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceMovement {
    pub symbol: String,
    pub old_price: f64,
    pub new_price: f64,
    pub change_percent: f64,
    pub timestamp: Option<String>,
    /// Absent means "whoever follows the symbol"
    pub target: Option<Target>,
    pub payload: Value,
}

impl PriceMovement {
    pub fn change(&self) -> f64 {
        self.new_price - self.old_price
    }

    pub fn is_significant(&self) -> bool {
        self.change_percent.abs() >= SIGNIFICANT_MOVE_PERCENT
    }

    /// Cached representation served to late joiners.
    pub fn snapshot(&self) -> Value {
        json!({
            "symbol": self.symbol,
            "price": self.new_price,
            "change": self.change(),
            "change_percent": self.change_percent,
            "timestamp": self.timestamp,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Arbitrage(ArbitrageAlert),
    PriceMovement(PriceMovement),
}

impl MarketEvent {
    /// Normalize a raw log record of the given kind.
    pub fn normalize(kind: EventKind, raw: &[u8]) -> Result<Self, IngestError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| IngestError::Malformed(format!("invalid JSON: {}", e)))?;

        let Value::Object(mut obj) = value else {
            return Err(IngestError::Malformed("payload is not a JSON object".into()));
        };

        let symbol = normalize_symbol(&string_field(&obj, "symbol"));
        if !symbol.is_empty() {
            obj.insert("symbol".into(), Value::String(symbol.clone()));
        }

        match kind {
            EventKind::Arbitrage => Ok(MarketEvent::Arbitrage(ArbitrageAlert {
                description: string_field(&obj, "description"),
                potential_profit: number_field(&obj, "potential_profit"),
                confidence: number_field(&obj, "confidence"),
                target: Target::from_json(obj.get("target_users")).unwrap_or(Target::All),
                symbol,
                payload: Value::Object(obj),
            })),
            EventKind::PriceMovement => Ok(MarketEvent::PriceMovement(PriceMovement {
                old_price: number_field(&obj, "old_price"),
                new_price: number_field(&obj, "new_price"),
                change_percent: number_field(&obj, "change_percent"),
                timestamp: obj.get("timestamp").and_then(scalar_to_string),
                target: Target::from_json(obj.get("target_users")),
                symbol,
                payload: Value::Object(obj),
            })),
        }
    }
}

/// Symbols are compared case-insensitively; the canonical form is uppercase.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_uppercase()
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key).and_then(scalar_to_string).unwrap_or_default()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number_field(obj: &Map<String, Value>, key: &str) -> f64 {
    let parsed = match obj.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite()).unwrap_or(0.0)
}
