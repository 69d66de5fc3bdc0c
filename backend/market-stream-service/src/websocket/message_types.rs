use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client -> server control frame
///
/// `{"action": "subscribe", "symbols": ["AAPL", "GOOGL"]}`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ControlFrame {
    pub action: String,
    #[serde(default)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

impl ControlFrame {
    /// `None` for actions this server does not know; those are ignored.
    pub fn action(&self) -> Option<ControlAction> {
        match self.action.as_str() {
            "subscribe" => Some(ControlAction::Subscribe),
            "unsubscribe" => Some(ControlAction::Unsubscribe),
            _ => None,
        }
    }
}

/// Server -> client frames, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Subscribed { symbols: Vec<String> },
    Unsubscribed { symbols: Vec<String> },

    /// Latest cached snapshot, sent when a client subscribes
    Quote { symbol: String, data: Value },
    /// Produced by external publishers on `prices:<symbol>` and relayed as-is
    Trade { symbol: String, data: Value },
    PriceUpdate { symbol: String, data: Value },

    Arbitrage { data: Value },
    PriceAlert { symbol: String, data: Value },

    /// Social frames come verbatim from external publishers on `social:feed`
    NewPost { data: Value },
    NewComment { data: Value },
    NewLike { data: Value },
}

impl OutboundFrame {
    pub fn to_json(&self) -> String {
        // Only string keys and JSON values inside; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_control_frame() {
        let frame: ControlFrame =
            serde_json::from_str(r#"{"action":"subscribe","symbols":["aapl","MSFT"]}"#).unwrap();
        assert_eq!(frame.action(), Some(ControlAction::Subscribe));
        assert_eq!(frame.symbols, vec!["aapl", "MSFT"]);

        let frame: ControlFrame = serde_json::from_str(r#"{"action":"unsubscribe"}"#).unwrap();
        assert_eq!(frame.action(), Some(ControlAction::Unsubscribe));
        assert!(frame.symbols.is_empty());

        let frame: ControlFrame = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(frame.action(), None);
    }

    #[test]
    fn test_outbound_tags() {
        let frame = OutboundFrame::Subscribed {
            symbols: vec!["AAPL".into()],
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "subscribed", "symbols": ["AAPL"]})
        );

        let frame = OutboundFrame::PriceUpdate {
            symbol: "AAPL".into(),
            data: json!({"new_price": 150.0}),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "price_update");
        assert_eq!(value["symbol"], "AAPL");

        let frame = OutboundFrame::NewPost { data: json!({"id": 1}) };
        assert_eq!(serde_json::to_value(&frame).unwrap()["type"], "new_post");
    }

    #[test]
    fn test_frame_round_trips_through_bus_payload() {
        let frame = OutboundFrame::Arbitrage {
            data: json!({"symbol": "BTC", "potential_profit": 1.25}),
        };
        let parsed: OutboundFrame = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(parsed, frame);
    }
}
