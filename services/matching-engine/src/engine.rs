//! Engine task group
//!
//! One engine instance per instrument, split into four cooperating tasks
//! joined only by bounded channels:
//!
//! ```text
//! OrderSource ──fetcher──▶ applier ──events──▶ committer ──▶ EventLog
//!                            │  ▲                  │
//!                   snapshot │  │ request          │ approved
//!                            ▼  │                  ▼
//!                          snapshotter ──────▶ SnapshotStore
//! ```
//!
//! The applier is the single writer over the book. A snapshot it captures
//! may be ahead of what the committer has persisted, so snapshots pass
//! through the committer for approval: only once every event up to the
//! snapshot's `log_seq` is durable does the snapshot reach the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use types::{Order, OrderStatus, Product};

use crate::api::{EngineSnapshot, LogStore, OrderReader, SnapshotStore, StoreError};
use crate::book::OrderBook;
use crate::log::LogEntry;

/// Tunables for one engine instance. Defaults match production cadence;
/// tests shrink the intervals.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the fetcher → applier order queue.
    pub order_queue_cap: usize,
    /// Capacity of the applier → committer event queue.
    pub log_queue_cap: usize,
    /// Capacity of the snapshot control queues.
    pub snapshot_queue_cap: usize,
    /// Max events per atomic log append.
    pub commit_batch_size: usize,
    /// How often the snapshotter requests a new snapshot.
    pub snapshot_interval: Duration,
    /// Skip a snapshot unless at least this many source offsets were
    /// consumed since the last one.
    pub snapshot_min_offset_delta: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order_queue_cap: 10_000,
            log_queue_cap: 10_000,
            snapshot_queue_cap: 32,
            commit_batch_size: 100,
            snapshot_interval: Duration::from_secs(30),
            snapshot_min_offset_delta: 1_000,
        }
    }
}

/// Snapshotter → applier: "consider taking a snapshot"; carries the
/// source offset of the last stored snapshot.
struct SnapshotRequest {
    last_offset: u64,
}

/// Handles to the four running tasks.
pub struct EngineHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Abort all engine tasks. Queues are dropped, not drained.
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// A matching engine for one instrument, restored and ready to start.
pub struct Engine {
    order_book: OrderBook,
    order_offset: u64,
    order_reader: Box<dyn OrderReader>,
    log_store: Arc<dyn LogStore>,
    snapshot_store: Arc<dyn SnapshotStore>,
    config: EngineConfig,
}

impl Engine {
    /// Build an engine, restoring book state, sequence counters, the
    /// dedup window and the source position from the latest snapshot.
    pub async fn new(
        product: Product,
        order_reader: Box<dyn OrderReader>,
        log_store: Arc<dyn LogStore>,
        snapshot_store: Arc<dyn SnapshotStore>,
        config: EngineConfig,
    ) -> Result<Self, StoreError> {
        let mut order_book = OrderBook::new(product);
        let mut order_offset = 0u64;

        if let Some(snapshot) = snapshot_store.get_latest().await? {
            tracing::info!(
                product_id = %snapshot.book.product_id,
                order_offset = snapshot.order_offset,
                log_seq = snapshot.book.log_seq,
                trade_seq = snapshot.book.trade_seq,
                "restoring engine from snapshot"
            );
            order_offset = snapshot.order_offset;
            order_book.restore(snapshot.book);
        }

        Ok(Self {
            order_book,
            order_offset,
            order_reader,
            log_store,
            snapshot_store,
            config,
        })
    }

    /// Spawn the fetcher, applier, committer and snapshotter.
    pub fn start(self) -> EngineHandle {
        let config = self.config;
        let (order_tx, order_rx) = mpsc::channel(config.order_queue_cap);
        let (log_tx, log_rx) = mpsc::channel(config.log_queue_cap);
        let (request_tx, request_rx) = mpsc::channel::<SnapshotRequest>(config.snapshot_queue_cap);
        let (approve_tx, approve_rx) = mpsc::channel::<EngineSnapshot>(config.snapshot_queue_cap);
        let (snapshot_tx, snapshot_rx) = mpsc::channel::<EngineSnapshot>(config.snapshot_queue_cap);

        let log_seq = self.order_book.log_seq();

        let tasks = vec![
            tokio::spawn(run_fetcher(self.order_reader, self.order_offset, order_tx)),
            tokio::spawn(run_applier(
                self.order_book,
                self.order_offset,
                config.snapshot_min_offset_delta,
                order_rx,
                log_tx,
                request_rx,
                approve_tx,
            )),
            tokio::spawn(run_committer(
                log_seq,
                config.commit_batch_size,
                self.log_store,
                log_rx,
                approve_rx,
                snapshot_tx,
            )),
            tokio::spawn(run_snapshotter(
                self.order_offset,
                config.snapshot_interval,
                self.snapshot_store,
                request_tx,
                snapshot_rx,
            )),
        ];

        EngineHandle { tasks }
    }
}

/// Pull orders from the source, starting just past the recovered offset,
/// and hand them to the applier.
async fn run_fetcher(
    mut reader: Box<dyn OrderReader>,
    recovered_offset: u64,
    order_tx: mpsc::Sender<(u64, Order)>,
) {
    let mut offset = recovered_offset;
    if offset > 0 {
        offset += 1;
    }
    if let Err(e) = reader.set_offset(offset).await {
        panic!("set order reader offset {} failed: {}", offset, e);
    }

    loop {
        match reader.fetch_order().await {
            Ok((offset, order)) => {
                if order_tx.send((offset, order)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "fetch order failed");
            }
        }
    }
}

/// Single-threaded owner of the order book: applies orders, emits events,
/// and captures snapshots on request.
async fn run_applier(
    mut book: OrderBook,
    mut order_offset: u64,
    snapshot_min_offset_delta: u64,
    mut order_rx: mpsc::Receiver<(u64, Order)>,
    log_tx: mpsc::Sender<LogEntry>,
    mut request_rx: mpsc::Receiver<SnapshotRequest>,
    approve_tx: mpsc::Sender<EngineSnapshot>,
) {
    loop {
        tokio::select! {
            maybe_order = order_rx.recv() => {
                let Some((offset, order)) = maybe_order else { return };

                let logs = match order.status {
                    OrderStatus::Cancelling => book.cancel(&order),
                    OrderStatus::New => book.apply(&order),
                };
                for log in logs {
                    if log_tx.send(log).await.is_err() {
                        return;
                    }
                }
                order_offset = offset;
            }

            maybe_request = request_rx.recv() => {
                let Some(request) = maybe_request else { return };

                let delta = order_offset.saturating_sub(request.last_offset);
                if delta <= snapshot_min_offset_delta {
                    continue;
                }

                tracing::info!(
                    product_id = %book.product_id(),
                    from = request.last_offset,
                    to = order_offset,
                    delta,
                    "capturing snapshot"
                );
                let snapshot = EngineSnapshot {
                    book: book.snapshot(),
                    order_offset,
                };
                if approve_tx.send(snapshot).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Persist emitted events in ordered batches and approve snapshots once
/// their covered sequence range is durable.
async fn run_committer(
    mut seq: u64,
    batch_size: usize,
    log_store: Arc<dyn LogStore>,
    mut log_rx: mpsc::Receiver<LogEntry>,
    mut approve_rx: mpsc::Receiver<EngineSnapshot>,
    snapshot_tx: mpsc::Sender<EngineSnapshot>,
) {
    let mut pending: Option<EngineSnapshot> = None;
    let mut batch: Vec<LogEntry> = Vec::with_capacity(batch_size);

    loop {
        tokio::select! {
            maybe_log = log_rx.recv() => {
                let Some(log) = maybe_log else { return };

                // Replay after a crash can re-emit already-stored events.
                if log.sequence() <= seq {
                    tracing::info!(sequence = log.sequence(), "discarding duplicate event");
                    continue;
                }
                seq = log.sequence();
                batch.push(log);

                // Keep filling from the queue until it drains or the
                // batch is full.
                while batch.len() < batch_size {
                    match log_rx.try_recv() {
                        Ok(log) => {
                            if log.sequence() <= seq {
                                tracing::info!(sequence = log.sequence(), "discarding duplicate event");
                                continue;
                            }
                            seq = log.sequence();
                            batch.push(log);
                        }
                        Err(_) => break,
                    }
                }

                if let Err(e) = log_store.store(&batch).await {
                    // The engine must not advance past events that are
                    // not durable.
                    panic!("event log append failed: {}", e);
                }
                batch.clear();

                if let Some(snapshot) = pending.take_if(|p| seq >= p.book.log_seq) {
                    if snapshot_tx.send(snapshot).await.is_err() {
                        return;
                    }
                }
            }

            maybe_snapshot = approve_rx.recv() => {
                let Some(snapshot) = maybe_snapshot else { return };

                if seq >= snapshot.book.log_seq {
                    pending = None;
                    if snapshot_tx.send(snapshot).await.is_err() {
                        return;
                    }
                    continue;
                }

                if let Some(old) = &pending {
                    tracing::info!(
                        old_log_seq = old.book.log_seq,
                        new_log_seq = snapshot.book.log_seq,
                        "replacing pending snapshot"
                    );
                }
                pending = Some(snapshot);
            }
        }
    }
}

/// Request a snapshot on a timer and persist approved ones. A failed
/// write is dropped; the next tick produces a fresh request.
async fn run_snapshotter(
    recovered_offset: u64,
    interval: Duration,
    snapshot_store: Arc<dyn SnapshotStore>,
    request_tx: mpsc::Sender<SnapshotRequest>,
    mut snapshot_rx: mpsc::Receiver<EngineSnapshot>,
) {
    let mut last_offset = recovered_offset;
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if request_tx.send(SnapshotRequest { last_offset }).await.is_err() {
                    return;
                }
            }

            maybe_snapshot = snapshot_rx.recv() => {
                let Some(snapshot) = maybe_snapshot else { return };

                match snapshot_store.store(&snapshot).await {
                    Ok(()) => {
                        tracing::info!(
                            product_id = %snapshot.book.product_id,
                            order_offset = snapshot.order_offset,
                            log_seq = snapshot.book.log_seq,
                            "snapshot stored"
                        );
                        last_offset = snapshot.order_offset;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "snapshot store failed");
                    }
                }
            }
        }
    }
}
