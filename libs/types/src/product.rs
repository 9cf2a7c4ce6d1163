//! Product (trading pair) configuration

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Static configuration for a tradable product, e.g. BTC-USDT.
///
/// `base_scale` and `quote_scale` are the number of decimal places carried
/// by base quantities and quote amounts. The matcher uses `base_scale` when
/// converting market-buy funds into a base size. The minimum sizes are
/// enforced at order intake, before anything reaches the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub base_scale: u32,
    pub quote_scale: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub base_min_size: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub quote_min_size: Decimal,
}

impl Product {
    pub fn new(id: &str, base_scale: u32, quote_scale: u32) -> Self {
        Self {
            id: id.to_string(),
            base_scale,
            quote_scale,
            base_min_size: Decimal::ZERO,
            quote_min_size: Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_roundtrip() {
        let product = Product::new("BTC-USDT", 4, 2);
        let json = serde_json::to_string(&product).unwrap();
        let back: Product = serde_json::from_str(&json).unwrap();
        assert_eq!(product, back);
    }
}
