//! Matching event model
//!
//! Every book mutation is described by one of three events, sequenced
//! densely per instrument by the applier:
//!
//! - `open`: a limit taker rested on the book
//! - `match`: a trade between the taker and a resting maker
//! - `done`: an order left the book (filled or cancelled)
//!
//! The JSON form is flat camelCase with decimal fields as strings and the
//! variant name in `"type"`; downstream consumers and the wire share this
//! representation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::{DoneReason, Side};

/// Header shared by all events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Base {
    pub sequence: u64,
    pub product_id: String,
    pub time: DateTime<Utc>,
}

impl Base {
    pub fn new(sequence: u64, product_id: &str) -> Self {
        Self {
            sequence,
            product_id: product_id.to_string(),
            time: Utc::now(),
        }
    }
}

/// A limit taker rested on the book with `remaining_size` left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenLog {
    #[serde(flatten)]
    pub base: Base,
    pub order_id: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub remaining_size: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub side: Side,
}

/// A trade. `side` is the maker's side; `price` is the maker's price.
/// `trade_id` is strictly increasing per instrument but sparse in the
/// event sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchLog {
    #[serde(flatten)]
    pub base: Base,
    pub trade_id: u64,
    pub taker_order_id: u64,
    pub maker_order_id: u64,
    pub side: Side,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
}

/// An order left the book. For market takers `price` and `remaining_size`
/// are zero regardless of what was left unspent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneLog {
    #[serde(flatten)]
    pub base: Base,
    pub order_id: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub remaining_size: Decimal,
    pub reason: DoneReason,
    pub side: Side,
}

/// Tagged union over the three event kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogEntry {
    Open(OpenLog),
    Match(MatchLog),
    Done(DoneLog),
}

impl LogEntry {
    /// Event sequence assigned by the applier.
    pub fn sequence(&self) -> u64 {
        match self {
            LogEntry::Open(l) => l.base.sequence,
            LogEntry::Match(l) => l.base.sequence,
            LogEntry::Done(l) => l.base.sequence,
        }
    }

    pub fn product_id(&self) -> &str {
        match self {
            LogEntry::Open(l) => &l.base.product_id,
            LogEntry::Match(l) => &l.base.product_id,
            LogEntry::Done(l) => &l.base.product_id,
        }
    }

    /// Label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            LogEntry::Open(_) => "open",
            LogEntry::Match(_) => "match",
            LogEntry::Done(_) => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_open_log_wire_format() {
        let log = LogEntry::Open(OpenLog {
            base: Base::new(7, "BTC-USDT"),
            order_id: 42,
            remaining_size: dec("1.5000"),
            price: dec("100.00"),
            side: Side::Buy,
        });

        let json = serde_json::to_string(&log).unwrap();
        assert!(json.contains("\"type\":\"open\""));
        assert!(json.contains("\"sequence\":7"));
        assert!(json.contains("\"productId\":\"BTC-USDT\""));
        assert!(json.contains("\"orderId\":42"));
        assert!(json.contains("\"remainingSize\":\"1.5000\""));
        assert!(json.contains("\"price\":\"100.00\""));
        assert!(json.contains("\"side\":\"buy\""));
    }

    #[test]
    fn test_match_log_wire_format() {
        let log = LogEntry::Match(MatchLog {
            base: Base::new(8, "BTC-USDT"),
            trade_id: 3,
            taker_order_id: 2,
            maker_order_id: 1,
            side: Side::Sell,
            price: dec("99.5"),
            size: dec("0.25"),
        });

        let json = serde_json::to_string(&log).unwrap();
        assert!(json.contains("\"type\":\"match\""));
        assert!(json.contains("\"tradeId\":3"));
        assert!(json.contains("\"takerOrderId\":2"));
        assert!(json.contains("\"makerOrderId\":1"));
    }

    #[test]
    fn test_done_log_wire_format() {
        let log = LogEntry::Done(DoneLog {
            base: Base::new(9, "BTC-USDT"),
            order_id: 5,
            price: dec("0"),
            remaining_size: dec("0"),
            reason: DoneReason::Cancelled,
            side: Side::Buy,
        });

        let json = serde_json::to_string(&log).unwrap();
        assert!(json.contains("\"type\":\"done\""));
        assert!(json.contains("\"reason\":\"cancelled\""));
    }

    #[test]
    fn test_log_entry_roundtrip() {
        let log = LogEntry::Match(MatchLog {
            base: Base::new(1, "ETH-USDC"),
            trade_id: 1,
            taker_order_id: 10,
            maker_order_id: 9,
            side: Side::Buy,
            price: dec("3000.12"),
            size: dec("2"),
        });

        let json = serde_json::to_string(&log).unwrap();
        let back: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(log, back);
    }

    #[test]
    fn test_time_serializes_rfc3339() {
        let log = LogEntry::Open(OpenLog {
            base: Base::new(1, "BTC-USDT"),
            order_id: 1,
            remaining_size: dec("1"),
            price: dec("1"),
            side: Side::Buy,
        });
        let value: serde_json::Value = serde_json::to_value(&log).unwrap();
        let time = value.get("time").unwrap().as_str().unwrap();
        assert!(time.contains('T'), "expected RFC 3339 timestamp, got {time}");
    }
}
