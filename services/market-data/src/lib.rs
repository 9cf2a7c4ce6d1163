//! Market Data Service: level-2 depth projection
//!
//! Consumes the matching engine's event log and produces:
//! - an aggregated per-price depth view per instrument
//! - incremental `Level2Change` updates fanned out to subscribers
//! - bounded level-2 snapshots plus periodic full snapshots for restarts
//!
//! # Architecture
//!
//! ```text
//! EventLog(P) ──tailer──▶ applier ──changes──▶ subscription fabric
//!                            │                        │
//!                   level-2 / full snapshots     per-client feed
//!                            ▼                  (snapshot, then deltas)
//!                     DepthSnapshotStore
//! ```
//!
//! The tailer enforces log density (duplicates are dropped, a gap is
//! fatal); the applier owns the depth book; each connected client runs a
//! small state machine that sends one coherent snapshot followed by
//! gap-free batched deltas.

pub mod depth;
pub mod feed;
pub mod messages;
pub mod store;
pub mod stream;
pub mod subscription;

pub use depth::{DepthBook, DepthFullSnapshot, Level2Snapshot};
pub use feed::Client;
pub use messages::{channel, ChannelMessage, Level2Change, PushMessage};
pub use store::{BlobDepthStore, DepthSnapshotStore};
pub use stream::{DepthCache, DepthStream, StreamConfig};
pub use subscription::Subscription;
