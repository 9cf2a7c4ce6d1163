//! Order types consumed by the matching engine
//!
//! Orders arrive from the intake layer already validated; the engine only
//! distinguishes new submissions from cancellation requests.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Wire label, as carried in event payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Rests on the book at its limit price when not fully matched
    Limit,
    /// Crosses any opposing price; never rests
    Market,
}

/// Order status as seen by the engine
///
/// Intake writes `New` for submissions and `Cancelling` for cancellation
/// requests; all other lifecycle states live outside the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Cancelling,
}

/// Reason an order left the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoneReason {
    Filled,
    Cancelled,
}

/// An order as delivered by the order source
///
/// `id` is globally unique and monotonic in submission time, which is what
/// gives same-price orders their time priority on the book. `funds` is only
/// meaningful for market buys; `price` is ignored for market orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub product_id: String,
    pub side: Side,
    pub order_type: OrderType,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub funds: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub status: OrderStatus,
}

impl Order {
    /// Create a new limit order submission
    pub fn limit(id: u64, product_id: &str, side: Side, price: Decimal, size: Decimal) -> Self {
        Self {
            id,
            product_id: product_id.to_string(),
            side,
            order_type: OrderType::Limit,
            size,
            funds: Decimal::ZERO,
            price,
            status: OrderStatus::New,
        }
    }

    /// Create a new market order submission
    ///
    /// A market buy spends `funds` (quote); a market sell disposes of `size`
    /// (base). The unused field is zero.
    pub fn market(id: u64, product_id: &str, side: Side, size: Decimal, funds: Decimal) -> Self {
        Self {
            id,
            product_id: product_id.to_string(),
            side,
            order_type: OrderType::Market,
            size,
            funds,
            price: Decimal::ZERO,
            status: OrderStatus::New,
        }
    }

    /// Create a cancellation request for a previously submitted order
    pub fn cancellation(id: u64, product_id: &str, side: Side) -> Self {
        Self {
            id,
            product_id: product_id.to_string(),
            side,
            order_type: OrderType::Limit,
            size: Decimal::ZERO,
            funds: Decimal::ZERO,
            price: Decimal::ZERO,
            status: OrderStatus::Cancelling,
        }
    }
}
