//! External contracts of the matching engine
//!
//! The engine is wired against four abstractions: a replayable order
//! source, an append-only event log (write and read sides), and a
//! snapshot store. Implementations live in [`crate::stores`] and in the
//! durability layer; anything honoring these contracts (a partitioned
//! message log, a key/value cache) can stand in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::Order;

use crate::book::BookSnapshot;
use crate::log::LogEntry;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("offset {0} not retained")]
    OffsetNotRetained(u64),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Totally ordered, replayable stream of user orders for one instrument.
///
/// Offsets are strictly increasing and 1-based; delivery is at-least-once
/// (the engine dedups by order id).
#[async_trait]
pub trait OrderReader: Send {
    /// Position the reader so the next fetch returns the first order with
    /// an offset at or above `offset`.
    async fn set_offset(&mut self, offset: u64) -> Result<(), StoreError>;

    /// Block until the next order is available.
    async fn fetch_order(&mut self) -> Result<(u64, Order), StoreError>;
}

/// Write side of the per-instrument event log.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append a batch atomically, preserving order.
    async fn store(&self, batch: &[LogEntry]) -> Result<(), StoreError>;
}

/// Read side of the per-instrument event log.
#[async_trait]
pub trait LogReader: Send {
    async fn set_offset(&mut self, offset: u64) -> Result<(), StoreError>;

    /// Block until the next event is available.
    async fn next(&mut self) -> Result<(u64, LogEntry), StoreError>;
}

/// A consistent engine state at some point in the order stream.
///
/// Restoring from it and replaying the order source from
/// `order_offset + 1` reproduces the engine exactly; the next emitted
/// event continues at `book.log_seq + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub book: BookSnapshot,
    pub order_offset: u64,
}

/// Latest-wins storage for engine snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn store(&self, snapshot: &EngineSnapshot) -> Result<(), StoreError>;

    /// The most recent snapshot, or `None` to start fresh.
    async fn get_latest(&self) -> Result<Option<EngineSnapshot>, StoreError>;
}
