//! Shared domain types for the matching core
//!
//! The vocabulary used by the matching engine, the durability layer and the
//! level-2 projector: order sides and types, the order struct consumed by
//! the engine, and per-product trading configuration.

pub mod order;
pub mod product;

pub use order::{DoneReason, Order, OrderStatus, OrderType, Side};
pub use product::Product;
