//! Per-instrument order book
//!
//! Each side keeps resting orders in two coherent structures: an id map
//! for direct lookup and an ordered queue keyed by (price, id) for match
//! traversal: ascending prices on the ask side, descending on the bid
//! side, older (smaller) id first within a price. A per-price level map
//! aggregates size and order count for snapshots.
//!
//! `apply` and `cancel` are the only entry points; both return the event
//! stream describing what happened, sequenced by this book's counters.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::{DoneReason, Order, OrderType, Product, Side};

use crate::log::{Base, DoneLog, LogEntry, MatchLog, OpenLog};
use crate::window::{Window, ORDER_ID_WINDOW_CAP};

/// A resting limit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookOrder {
    pub order_id: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    pub side: Side,
}

/// Aggregated size and order count at one price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    pub order_count: u64,
}

/// Match-priority key: price first (side-dependent direction), then
/// order id, which is monotonic in submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PriceTimeKey {
    price: Decimal,
    order_id: u64,
    side: Side,
}

impl Ord for PriceTimeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_price = match self.side {
            Side::Sell => self.price.cmp(&other.price),
            Side::Buy => other.price.cmp(&self.price),
        };
        by_price.then_with(|| self.order_id.cmp(&other.order_id))
    }
}

impl PartialOrd for PriceTimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One side of the book.
#[derive(Debug, Clone)]
struct Depth {
    side: Side,
    orders: HashMap<u64, BookOrder>,
    levels: BTreeMap<Decimal, PriceLevel>,
    queue: BTreeSet<PriceTimeKey>,
}

impl Depth {
    fn new(side: Side) -> Self {
        Self {
            side,
            orders: HashMap::new(),
            levels: BTreeMap::new(),
            queue: BTreeSet::new(),
        }
    }

    fn add(&mut self, order: BookOrder) {
        self.queue.insert(PriceTimeKey {
            price: order.price,
            order_id: order.order_id,
            side: self.side,
        });

        self.levels
            .entry(order.price)
            .and_modify(|level| {
                level.size += order.size;
                level.order_count += 1;
            })
            .or_insert_with(|| PriceLevel {
                price: order.price,
                size: order.size,
                order_count: 1,
            });

        self.orders.insert(order.order_id, order);
    }

    /// Remove `size` from a resting order, dropping it from the book when
    /// it reaches zero. Returns the order's remaining size.
    ///
    /// # Panics
    /// Panics on an unknown id or a decrement larger than the resting
    /// size: either means book state is corrupt and replay is the only
    /// safe recovery.
    fn decr_size(&mut self, order_id: u64, size: Decimal) -> Decimal {
        let order = self
            .orders
            .get_mut(&order_id)
            .unwrap_or_else(|| panic!("order {} not found on book", order_id));
        assert!(
            order.size >= size,
            "order {} size {} less than decrement {}",
            order_id,
            order.size,
            size
        );

        order.size -= size;
        let price = order.price;
        let remaining = order.size;
        let removed = remaining.is_zero();

        if removed {
            self.orders.remove(&order_id);
            self.queue.remove(&PriceTimeKey {
                price,
                order_id,
                side: self.side,
            });
        }

        let level = self
            .levels
            .get_mut(&price)
            .unwrap_or_else(|| panic!("level {} missing for order {}", price, order_id));
        level.size -= size;
        if level.size.is_zero() {
            self.levels.remove(&price);
        } else if removed {
            level.order_count -= 1;
        }

        remaining
    }

    /// Highest-priority resting order id, if any.
    fn front(&self) -> Option<u64> {
        self.queue.iter().next().map(|key| key.order_id)
    }

    fn get(&self, order_id: u64) -> Option<&BookOrder> {
        self.orders.get(&order_id)
    }
}

/// Serialized book state for crash recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub product_id: String,
    pub orders: Vec<BookOrder>,
    pub trade_seq: u64,
    pub log_seq: u64,
    pub order_id_window: Window,
}

/// The transient taker built from an incoming order. Market takers carry
/// no price; they cross every opposing level until size or funds run out.
struct Taker {
    order_id: u64,
    side: Side,
    order_type: OrderType,
    size: Decimal,
    funds: Decimal,
    price: Decimal,
}

impl Taker {
    fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            side: order.side,
            order_type: order.order_type,
            size: order.size,
            funds: order.funds,
            price: order.price,
        }
    }

    fn crosses(&self, maker_price: Decimal) -> bool {
        match self.order_type {
            OrderType::Market => true,
            OrderType::Limit => match self.side {
                Side::Buy => self.price >= maker_price,
                Side::Sell => self.price <= maker_price,
            },
        }
    }
}

/// Order book for one product.
#[derive(Debug, Clone)]
pub struct OrderBook {
    product: Product,
    bids: Depth,
    asks: Depth,
    trade_seq: u64,
    log_seq: u64,
    order_id_window: Window,
}

impl OrderBook {
    pub fn new(product: Product) -> Self {
        Self {
            product,
            bids: Depth::new(Side::Buy),
            asks: Depth::new(Side::Sell),
            trade_seq: 0,
            log_seq: 0,
            order_id_window: Window::new(0, ORDER_ID_WINDOW_CAP),
        }
    }

    fn depth(&self, side: Side) -> &Depth {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn depth_mut(&mut self, side: Side) -> &mut Depth {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn next_log_seq(&mut self) -> u64 {
        self.log_seq += 1;
        self.log_seq
    }

    fn next_trade_seq(&mut self) -> u64 {
        self.trade_seq += 1;
        self.trade_seq
    }

    pub fn log_seq(&self) -> u64 {
        self.log_seq
    }

    pub fn trade_seq(&self) -> u64 {
        self.trade_seq
    }

    pub fn product_id(&self) -> &str {
        &self.product.id
    }

    /// Apply a new order against the book, emitting the resulting events.
    ///
    /// A duplicate or expired order id produces no events: the order
    /// source delivers at-least-once and redelivery is routine.
    pub fn apply(&mut self, order: &Order) -> Vec<LogEntry> {
        if let Err(e) = self.order_id_window.put(order.id) {
            tracing::warn!(product_id = %self.product.id, error = %e, "dropping order");
            return Vec::new();
        }

        let mut taker = Taker::from_order(order);
        let mut logs = Vec::new();
        let opposite = taker.side.opposite();

        loop {
            let Some(maker_id) = self.depth(opposite).front() else {
                break;
            };
            let maker = self.depth(opposite).get(maker_id).cloned().expect("front order present");

            if !taker.crosses(maker.price) {
                break;
            }

            // Trade size is bounded by the maker and by whatever capacity
            // the taker has left, which is size for limit and market-sell
            // takers, and funds at the maker's price for market buys.
            let price = maker.price;
            let size = match (taker.order_type, taker.side) {
                (OrderType::Limit, _) | (OrderType::Market, Side::Sell) => {
                    if taker.size.is_zero() {
                        break;
                    }
                    let size = taker.size.min(maker.size);
                    taker.size -= size;
                    size
                }
                (OrderType::Market, Side::Buy) => {
                    if taker.funds.is_zero() {
                        break;
                    }
                    let taker_size =
                        (taker.funds / price).trunc_with_scale(self.product.base_scale);
                    if taker_size.is_zero() {
                        break;
                    }
                    let size = taker_size.min(maker.size);
                    taker.funds -= size * price;
                    size
                }
            };

            let remaining = self.depth_mut(opposite).decr_size(maker_id, size);

            let sequence = self.next_log_seq();
            let trade_id = self.next_trade_seq();
            logs.push(LogEntry::Match(MatchLog {
                base: Base::new(sequence, &self.product.id),
                trade_id,
                taker_order_id: taker.order_id,
                maker_order_id: maker_id,
                side: maker.side,
                price,
                size,
            }));

            if remaining.is_zero() {
                let sequence = self.next_log_seq();
                logs.push(LogEntry::Done(DoneLog {
                    base: Base::new(sequence, &self.product.id),
                    order_id: maker_id,
                    price: maker.price,
                    remaining_size: Decimal::ZERO,
                    reason: DoneReason::Filled,
                    side: maker.side,
                }));
            }
        }

        if taker.order_type == OrderType::Limit && taker.size > Decimal::ZERO {
            let resting = BookOrder {
                order_id: taker.order_id,
                price: taker.price,
                size: taker.size,
                side: taker.side,
            };
            self.depth_mut(taker.side).add(resting);

            let sequence = self.next_log_seq();
            logs.push(LogEntry::Open(OpenLog {
                base: Base::new(sequence, &self.product.id),
                order_id: taker.order_id,
                remaining_size: taker.size,
                price: taker.price,
                side: taker.side,
            }));
        } else {
            let (price, remaining_size, reason) = match taker.order_type {
                OrderType::Limit => (taker.price, taker.size, DoneReason::Filled),
                OrderType::Market => {
                    let unspent = match taker.side {
                        Side::Sell => taker.size > Decimal::ZERO,
                        Side::Buy => taker.funds > Decimal::ZERO,
                    };
                    let reason = if unspent {
                        DoneReason::Cancelled
                    } else {
                        DoneReason::Filled
                    };
                    (Decimal::ZERO, Decimal::ZERO, reason)
                }
            };

            let sequence = self.next_log_seq();
            logs.push(LogEntry::Done(DoneLog {
                base: Base::new(sequence, &self.product.id),
                order_id: taker.order_id,
                price,
                remaining_size,
                reason,
                side: taker.side,
            }));
        }

        logs
    }

    /// Cancel a resting order, emitting a `done` event.
    ///
    /// The id is recorded in the dedup window either way; an order that is
    /// not resting (already filled, already cancelled, or never rested)
    /// produces no events.
    pub fn cancel(&mut self, order: &Order) -> Vec<LogEntry> {
        let _ = self.order_id_window.put(order.id);

        let Some(book_order) = self.depth(order.side).get(order.id).cloned() else {
            return Vec::new();
        };

        let remaining_size = book_order.size;
        self.depth_mut(order.side).decr_size(order.id, remaining_size);

        let sequence = self.next_log_seq();
        vec![LogEntry::Done(DoneLog {
            base: Base::new(sequence, &self.product.id),
            order_id: book_order.order_id,
            price: book_order.price,
            remaining_size,
            reason: DoneReason::Cancelled,
            side: book_order.side,
        })]
    }

    /// Capture a consistent copy of the book state.
    pub fn snapshot(&self) -> BookSnapshot {
        let mut orders: Vec<BookOrder> = self.asks.orders.values().cloned().collect();
        orders.extend(self.bids.orders.values().cloned());
        orders.sort_by_key(|o| o.order_id);

        BookSnapshot {
            product_id: self.product.id.clone(),
            orders,
            trade_seq: self.trade_seq,
            log_seq: self.log_seq,
            order_id_window: self.order_id_window.clone(),
        }
    }

    /// Restore state from a snapshot. Sequence counters continue from the
    /// snapshot so event numbering stays dense across restarts. A snapshot
    /// with a zero-capacity window (from an empty store) gets a fresh one.
    pub fn restore(&mut self, snapshot: BookSnapshot) {
        self.log_seq = snapshot.log_seq;
        self.trade_seq = snapshot.trade_seq;
        self.order_id_window = if snapshot.order_id_window.cap() == 0 {
            Window::new(0, ORDER_ID_WINDOW_CAP)
        } else {
            snapshot.order_id_window
        };

        for order in snapshot.orders {
            self.depth_mut(order.side).add(order);
        }
    }

    // ── Inspection helpers (used by snapshots and tests) ────────────

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.queue.iter().next().map(|k| k.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.queue.iter().next().map(|k| k.price)
    }

    pub fn order(&self, side: Side, order_id: u64) -> Option<&BookOrder> {
        self.depth(side).get(order_id)
    }

    pub fn order_count(&self) -> usize {
        self.bids.orders.len() + self.asks.orders.len()
    }

    pub fn level(&self, side: Side, price: Decimal) -> Option<&PriceLevel> {
        self.depth(side).levels.get(&price)
    }
}
