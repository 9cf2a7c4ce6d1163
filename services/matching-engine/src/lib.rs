//! Matching Engine Service
//!
//! Per-instrument order matching with price-time priority, an append-only
//! event stream, and snapshot-based crash recovery.
//!
//! Each instrument runs one engine: a fetcher pulling orders from the
//! order source, a single-writer applier that owns the book, a committer
//! persisting emitted events in ordered batches, and a snapshotter that
//! periodically captures consistent state. The tasks communicate only
//! through bounded channels; no locks protect book state.
//!
//! **Key Invariants:**
//! - Event sequence is dense (1, 2, 3, …) per instrument, across restarts
//! - Price-time priority strictly enforced (price, then order id)
//! - Deterministic matching (same inputs → same outputs)
//! - A snapshot is persisted only after every event it covers is durable

pub mod api;
pub mod book;
pub mod engine;
pub mod log;
pub mod stores;
pub mod window;

pub use api::{EngineSnapshot, LogReader, LogStore, OrderReader, SnapshotStore, StoreError};
pub use book::{BookOrder, BookSnapshot, OrderBook, PriceLevel};
pub use engine::{Engine, EngineConfig, EngineHandle};
pub use log::{Base, DoneLog, LogEntry, MatchLog, OpenLog};
pub use stores::{
    BlobSnapshotStore, FileLogReader, FileLogStore, MemoryEventLog, MemoryEventLogReader,
    MemoryOrderReader, MemoryOrderSource,
};
pub use window::Window;
