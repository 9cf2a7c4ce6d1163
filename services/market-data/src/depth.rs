//! Projector-side depth book
//!
//! Rebuilds per-order and per-level state from the event log. Unlike the
//! matching book it never matches anything: every event reduces to
//! `apply_order(id, new_size, price, side)`, which reconciles the order
//! map and the level map and reports the changed level.
//!
//! Two invariants hold after every application:
//! - each side's level sizes sum to its resting order sizes
//! - each level's order count equals the orders resting at its price

use std::collections::{BTreeMap, HashMap};

use matching_engine::{BookOrder, PriceLevel};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::Side;

use crate::messages::{Level2Change, LevelTuple};

/// Bounded aggregated view: top levels per side, wire-formatted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level2Snapshot {
    pub product_id: String,
    pub seq: u64,
    pub bids: Vec<LevelTuple>,
    pub asks: Vec<LevelTuple>,
}

/// Complete projector state; restoring it and resuming the log at
/// `log_offset + 1` (expecting `log_seq + 1`) reproduces the projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthFullSnapshot {
    pub product_id: String,
    pub seq: u64,
    pub log_offset: u64,
    pub log_seq: u64,
    pub orders: Vec<BookOrder>,
}

/// Aggregated depth for one instrument.
#[derive(Debug, Clone)]
pub struct DepthBook {
    product_id: String,
    seq: u64,
    log_offset: u64,
    log_seq: u64,
    orders: HashMap<u64, BookOrder>,
    bids: BTreeMap<Decimal, PriceLevel>,
    asks: BTreeMap<Decimal, PriceLevel>,
}

impl DepthBook {
    pub fn new(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            seq: 0,
            log_offset: 0,
            log_seq: 0,
            orders: HashMap::new(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn log_offset(&self) -> u64 {
        self.log_offset
    }

    pub fn log_seq(&self) -> u64 {
        self.log_seq
    }

    pub fn order(&self, order_id: u64) -> Option<&BookOrder> {
        self.orders.get(&order_id)
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Set an order's size to `new_size`, creating or removing it as
    /// needed, and keep the level aggregation coherent.
    ///
    /// Returns the change to publish, or `None` when nothing happened (an
    /// unknown order shrinking to zero). A negative size means the log
    /// and this projection have diverged, which is unrecoverable.
    pub fn apply_order(
        &mut self,
        log_offset: u64,
        log_seq: u64,
        order_id: u64,
        new_size: Decimal,
        price: Decimal,
        side: Side,
    ) -> Option<Level2Change> {
        assert!(
            new_size >= Decimal::ZERO,
            "negative size {} for order {}",
            new_size,
            order_id
        );

        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };

        let level_size = match self.orders.get(&order_id).map(|order| order.size) {
            None => {
                if new_size.is_zero() {
                    return None;
                }
                self.orders.insert(
                    order_id,
                    BookOrder {
                        order_id,
                        price,
                        size: new_size,
                        side,
                    },
                );
                let level = levels
                    .entry(price)
                    .and_modify(|level| {
                        level.size += new_size;
                        level.order_count += 1;
                    })
                    .or_insert_with(|| PriceLevel {
                        price,
                        size: new_size,
                        order_count: 1,
                    });
                level.size
            }
            Some(old_size) => {
                let decrement = old_size - new_size;
                let removed = new_size.is_zero();
                if removed {
                    self.orders.remove(&order_id);
                } else if let Some(order) = self.orders.get_mut(&order_id) {
                    order.size = new_size;
                }

                let level = levels.get_mut(&price).unwrap_or_else(|| {
                    panic!(
                        "level {} missing for order {} (size {}, {:?})",
                        price, order_id, new_size, side
                    )
                });
                level.size -= decrement;
                let level_size = level.size;
                if level.size.is_zero() {
                    levels.remove(&price);
                } else if removed {
                    level.order_count -= 1;
                }
                level_size
            }
        };

        self.log_offset = log_offset;
        self.log_seq = log_seq;
        self.seq += 1;

        Some(Level2Change {
            product_id: self.product_id.clone(),
            seq: self.seq,
            side: side.as_str().to_string(),
            price: price.to_string(),
            size: level_size.to_string(),
        })
    }

    /// Top `limit` levels per side, best first.
    pub fn snapshot_level2(&self, limit: usize) -> Level2Snapshot {
        let to_tuple = |level: &PriceLevel| -> LevelTuple {
            (
                level.price.to_string(),
                level.size.to_string(),
                level.order_count,
            )
        };

        Level2Snapshot {
            product_id: self.product_id.clone(),
            seq: self.seq,
            bids: self.bids.values().rev().take(limit).map(to_tuple).collect(),
            asks: self.asks.values().take(limit).map(to_tuple).collect(),
        }
    }

    /// Complete state for restart.
    pub fn snapshot_full(&self) -> DepthFullSnapshot {
        let mut orders: Vec<BookOrder> = self.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.order_id);

        DepthFullSnapshot {
            product_id: self.product_id.clone(),
            seq: self.seq,
            log_offset: self.log_offset,
            log_seq: self.log_seq,
            orders,
        }
    }

    /// Rebuild from a full snapshot: replay the orders through
    /// [`Self::apply_order`], then overwrite the counters (the replay
    /// itself must not advance them).
    pub fn restore(&mut self, snapshot: DepthFullSnapshot) {
        for order in &snapshot.orders {
            self.apply_order(0, 0, order.order_id, order.size, order.price, order.side);
        }
        self.product_id = snapshot.product_id;
        self.seq = snapshot.seq;
        self.log_offset = snapshot.log_offset;
        self.log_seq = snapshot.log_seq;
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        for (side, levels) in [(Side::Buy, &self.bids), (Side::Sell, &self.asks)] {
            let level_total: Decimal = levels.values().map(|l| l.size).sum();
            let order_total: Decimal = self
                .orders
                .values()
                .filter(|o| o.side == side)
                .map(|o| o.size)
                .sum();
            assert_eq!(level_total, order_total, "size mismatch on {:?} side", side);

            for level in levels.values() {
                let at_price = self
                    .orders
                    .values()
                    .filter(|o| o.side == side && o.price == level.price)
                    .count() as u64;
                assert_eq!(
                    level.order_count, at_price,
                    "order count mismatch at {} on {:?} side",
                    level.price, side
                );
            }
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
    fn test_insert_creates_level() {
        let mut book = DepthBook::new("BTC-USDT");
        let change = book
            .apply_order(1, 1, 10, dec("1.5"), dec("100"), Side::Buy)
            .unwrap();

        assert_eq!(change.seq, 1);
        assert_eq!(change.side, "buy");
        assert_eq!(change.price, "100");
        assert_eq!(change.size, "1.5");
        book.check_invariants();
    }

    #[test]
    fn test_second_order_same_level_aggregates() {
        let mut book = DepthBook::new("BTC-USDT");
        book.apply_order(1, 1, 10, dec("1"), dec("100"), Side::Buy);
        let change = book
            .apply_order(2, 2, 11, dec("2"), dec("100"), Side::Buy)
            .unwrap();

        assert_eq!(change.size, "3");
        book.check_invariants();
    }

    #[test]
    fn test_shrink_and_remove_order() {
        let mut book = DepthBook::new("BTC-USDT");
        book.apply_order(1, 1, 10, dec("2"), dec("100"), Side::Sell);
        book.apply_order(2, 2, 11, dec("1"), dec("100"), Side::Sell);

        // Partial fill of order 10.
        let change = book
            .apply_order(3, 3, 10, dec("0.5"), dec("100"), Side::Sell)
            .unwrap();
        assert_eq!(change.size, "1.5");
        book.check_invariants();

        // Order 10 fully consumed; level survives with order 11.
        let change = book
            .apply_order(4, 4, 10, dec("0"), dec("100"), Side::Sell)
            .unwrap();
        assert_eq!(change.size, "1");
        assert!(book.order(10).is_none());
        book.check_invariants();

        // Order 11 consumed; level is gone and the change reports zero.
        let change = book
            .apply_order(5, 5, 11, dec("0"), dec("100"), Side::Sell)
            .unwrap();
        assert_eq!(change.size, "0");
        assert_eq!(book.order_count(), 0);
        book.check_invariants();
    }

    #[test]
    fn test_unknown_order_zero_size_is_noop() {
        let mut book = DepthBook::new("BTC-USDT");
        assert!(book
            .apply_order(1, 1, 99, dec("0"), dec("100"), Side::Buy)
            .is_none());
        assert_eq!(book.seq(), 0);
    }

    #[test]
    fn test_seq_increments_densely() {
        let mut book = DepthBook::new("BTC-USDT");
        for (i, id) in (10..15u64).enumerate() {
            let change = book
                .apply_order(i as u64 + 1, i as u64 + 1, id, dec("1"), dec("100"), Side::Buy)
                .unwrap();
            assert_eq!(change.seq, i as u64 + 1);
        }
    }

    #[test]
    fn test_snapshot_level2_ordering_and_bound() {
        let mut book = DepthBook::new("BTC-USDT");
        for (i, price) in ["99", "100", "98"].iter().enumerate() {
            book.apply_order(
                i as u64 + 1,
                i as u64 + 1,
                i as u64 + 10,
                dec("1"),
                dec(price),
                Side::Buy,
            );
        }
        for (i, price) in ["102", "101"].iter().enumerate() {
            book.apply_order(
                i as u64 + 4,
                i as u64 + 4,
                i as u64 + 20,
                dec("1"),
                dec(price),
                Side::Sell,
            );
        }

        let snapshot = book.snapshot_level2(2);
        // Bids best-first (descending), asks best-first (ascending),
        // both truncated to the limit.
        assert_eq!(snapshot.bids[0].0, "100");
        assert_eq!(snapshot.bids[1].0, "99");
        assert_eq!(snapshot.bids.len(), 2);
        assert_eq!(snapshot.asks[0].0, "101");
        assert_eq!(snapshot.asks[1].0, "102");
    }

    #[test]
    fn test_full_snapshot_restore_roundtrip() {
        let mut book = DepthBook::new("BTC-USDT");
        book.apply_order(1, 1, 10, dec("1"), dec("100"), Side::Buy);
        book.apply_order(2, 2, 11, dec("2"), dec("101"), Side::Sell);
        book.apply_order(3, 3, 10, dec("0.5"), dec("100"), Side::Buy);

        let snapshot = book.snapshot_full();
        assert_eq!(snapshot.seq, 3);
        assert_eq!(snapshot.log_offset, 3);

        let mut restored = DepthBook::new("BTC-USDT");
        restored.restore(snapshot.clone());

        // Counters come from the snapshot, not from the replay.
        assert_eq!(restored.seq(), 3);
        assert_eq!(restored.log_offset(), 3);
        assert_eq!(restored.log_seq(), 3);
        assert_eq!(restored.snapshot_full(), snapshot);
        restored.check_invariants();
    }

    #[test]
    #[should_panic(expected = "negative size")]
    fn test_negative_size_panics() {
        let mut book = DepthBook::new("BTC-USDT");
        book.apply_order(1, 1, 10, dec("-1"), dec("100"), Side::Buy);
    }

    #[test]
    fn test_invariants_hold_under_random_stream() {
        use rand::{Rng, SeedableRng};

        // Seeded so a failure is reproducible.
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let mut book = DepthBook::new("BTC-USDT");
        let mut live: Vec<u64> = Vec::new();
        let mut next_id = 1u64;

        for step in 1..=500u64 {
            let insert = live.is_empty() || rng.gen_bool(0.6);
            if insert {
                let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
                let price = Decimal::from(rng.gen_range(90..110u32));
                let size = Decimal::new(rng.gen_range(1..5_000i64), 4);
                book.apply_order(step, step, next_id, size, price, side);
                live.push(next_id);
                next_id += 1;
            } else {
                let idx = rng.gen_range(0..live.len());
                let order_id = live[idx];
                let order = book.order(order_id).cloned().unwrap();
                let shrink_to_zero = rng.gen_bool(0.5);
                let new_size = if shrink_to_zero {
                    live.swap_remove(idx);
                    Decimal::ZERO
                } else {
                    // Halve, truncated to the book's precision.
                    (order.size / Decimal::TWO).trunc_with_scale(4)
                };
                if new_size.is_zero() && !shrink_to_zero {
                    live.swap_remove(idx);
                }
                book.apply_order(step, step, order_id, new_size, order.price, order.side);
            }
            book.check_invariants();
        }

        assert_eq!(book.order_count(), live.len());
    }
}
