//! Depth projection stream
//!
//! Per instrument: a tailer reads the event log (enforcing sequence
//! density), an applier folds events into the depth book and publishes
//! level-2 changes, and a snapshot writer persists level-2 and full
//! snapshots off the hot path.
//!
//! Restart path: load the last full snapshot, rebuild the book from it,
//! resume the log at `log_offset + 1` expecting `log_seq + 1`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use matching_engine::{LogEntry, LogReader, StoreError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::depth::{DepthBook, DepthFullSnapshot, Level2Snapshot};
use crate::messages::{channel, ChannelMessage};
use crate::store::DepthSnapshotStore;
use crate::subscription::Subscription;

/// Cadence and capacity tunables for one projection stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Refresh the level-2 snapshot after this many projector seqs.
    pub level2_snapshot_interval: u64,
    /// Persist the full snapshot after this many projector seqs.
    pub full_snapshot_interval: u64,
    /// Idle tick: refresh the level-2 snapshot if anything changed.
    pub idle_refresh: Duration,
    /// Levels per side in a level-2 snapshot.
    pub level2_depth_limit: usize,
    /// Capacity of the tailer → applier event queue.
    pub log_queue_cap: usize,
    /// Capacity of the applier → snapshot writer queue.
    pub snapshot_queue_cap: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            level2_snapshot_interval: 10,
            full_snapshot_interval: 10_000,
            idle_refresh: Duration::from_millis(200),
            level2_depth_limit: 1_000,
            log_queue_cap: 1_000,
            snapshot_queue_cap: 100,
        }
    }
}

/// Shared "last known depth" map: the current level-2 snapshot per
/// instrument. Projector appliers write; subscriber feeds read.
#[derive(Default)]
pub struct DepthCache {
    snapshots: DashMap<String, Level2Snapshot>,
}

impl DepthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, product_id: &str) -> Option<Level2Snapshot> {
        self.snapshots.get(product_id).map(|s| s.clone())
    }

    pub fn store(&self, snapshot: Level2Snapshot) {
        self.snapshots.insert(snapshot.product_id.clone(), snapshot);
    }
}

enum SnapshotJob {
    Level2(Level2Snapshot),
    Full(DepthFullSnapshot),
}

/// The projection pipeline for one instrument, restored and ready to
/// start.
pub struct DepthStream {
    book: DepthBook,
    log_reader: Box<dyn LogReader>,
    sub: Arc<Subscription>,
    depth_store: Arc<dyn DepthSnapshotStore>,
    cache: Arc<DepthCache>,
    config: StreamConfig,
}

impl DepthStream {
    pub fn new(
        product_id: &str,
        log_reader: Box<dyn LogReader>,
        sub: Arc<Subscription>,
        depth_store: Arc<dyn DepthSnapshotStore>,
        cache: Arc<DepthCache>,
        config: StreamConfig,
    ) -> Result<Self, StoreError> {
        let mut book = DepthBook::new(product_id);
        if let Some(snapshot) = depth_store.get_last_full(product_id)? {
            tracing::info!(
                product_id,
                seq = snapshot.seq,
                log_offset = snapshot.log_offset,
                log_seq = snapshot.log_seq,
                orders = snapshot.orders.len(),
                "restoring depth book from snapshot"
            );
            book.restore(snapshot);
        }

        Ok(Self {
            book,
            log_reader,
            sub,
            depth_store,
            cache,
            config,
        })
    }

    /// Spawn the tailer, applier and snapshot writer.
    pub fn start(self) -> Vec<JoinHandle<()>> {
        let (log_tx, log_rx) = mpsc::channel(self.config.log_queue_cap);
        let (snapshot_tx, snapshot_rx) = mpsc::channel(self.config.snapshot_queue_cap);

        vec![
            tokio::spawn(run_tailer(
                self.log_reader,
                self.book.log_seq(),
                self.book.log_offset(),
                log_tx,
            )),
            tokio::spawn(run_applier(
                self.book,
                self.config,
                log_rx,
                snapshot_tx,
                self.sub,
                self.cache,
            )),
            tokio::spawn(run_snapshot_writer(self.depth_store, snapshot_rx)),
        ]
    }
}

/// Tail the event log, enforcing the reader contract: events at or below
/// the last seen sequence are discarded (recovery replay produces them);
/// a gap means the log source lost data and the projection cannot
/// continue.
async fn run_tailer(
    mut reader: Box<dyn LogReader>,
    start_seq: u64,
    start_offset: u64,
    log_tx: mpsc::Sender<(u64, LogEntry)>,
) {
    let mut offset = start_offset;
    if offset > 0 {
        offset += 1;
    }
    if let Err(e) = reader.set_offset(offset).await {
        panic!("set log reader offset {} failed: {}", offset, e);
    }

    let mut last_seq = start_seq;
    loop {
        match reader.next().await {
            Ok((offset, entry)) => {
                let seq = entry.sequence();
                if seq <= last_seq {
                    tracing::info!(sequence = seq, last_seq, "discarding replayed event");
                    continue;
                }
                if last_seq > 0 && seq != last_seq + 1 {
                    panic!(
                        "event log gap: last sequence {} followed by {}",
                        last_seq, seq
                    );
                }
                last_seq = seq;
                if log_tx.send((offset, entry)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "event log read failed");
            }
        }
    }
}

/// Fold events into the depth book, publish changes, and cut snapshots
/// on cadence and on the idle tick.
async fn run_applier(
    mut book: DepthBook,
    config: StreamConfig,
    mut log_rx: mpsc::Receiver<(u64, LogEntry)>,
    snapshot_tx: mpsc::Sender<SnapshotJob>,
    sub: Arc<Subscription>,
    cache: Arc<DepthCache>,
) {
    let mut last_level2_seq: Option<u64> = None;
    let mut last_full_seq: Option<u64> = None;

    loop {
        let received = tokio::select! {
            maybe = log_rx.recv() => match maybe {
                Some(received) => Some(received),
                None => return,
            },
            _ = tokio::time::sleep(config.idle_refresh) => None,
        };

        let Some((offset, entry)) = received else {
            // Idle: make sure the cached snapshot reflects the latest
            // applied change.
            if last_level2_seq.is_none_or(|seq| book.seq() > seq) {
                let snapshot = book.snapshot_level2(config.level2_depth_limit);
                last_level2_seq = Some(snapshot.seq);
                cache.store(snapshot.clone());
                if snapshot_tx.send(SnapshotJob::Level2(snapshot)).await.is_err() {
                    return;
                }
            }
            continue;
        };

        let change = match &entry {
            LogEntry::Open(open) => book.apply_order(
                offset,
                open.base.sequence,
                open.order_id,
                open.remaining_size,
                open.price,
                open.side,
            ),
            LogEntry::Match(m) => {
                // The maker must be resting; its absence means this
                // projection has diverged from the log.
                let order = book.order(m.maker_order_id).unwrap_or_else(|| {
                    panic!("maker order {} missing from depth book", m.maker_order_id)
                });
                let new_size = order.size - m.size;
                book.apply_order(offset, m.base.sequence, m.maker_order_id, new_size, m.price, m.side)
            }
            LogEntry::Done(done) => match book.order(done.order_id) {
                // Already fully consumed by a preceding match event.
                None => None,
                Some(order) => {
                    let new_size = order.size - done.remaining_size;
                    book.apply_order(
                        offset,
                        done.base.sequence,
                        done.order_id,
                        new_size,
                        done.price,
                        done.side,
                    )
                }
            },
        };

        if last_level2_seq.is_none_or(|seq| book.seq() - seq > config.level2_snapshot_interval) {
            let snapshot = book.snapshot_level2(config.level2_depth_limit);
            last_level2_seq = Some(snapshot.seq);
            cache.store(snapshot.clone());
            if snapshot_tx.send(SnapshotJob::Level2(snapshot)).await.is_err() {
                return;
            }
        }

        if last_full_seq.is_none_or(|seq| book.seq() - seq > config.full_snapshot_interval) {
            let snapshot = book.snapshot_full();
            last_full_seq = Some(snapshot.seq);
            if snapshot_tx.send(SnapshotJob::Full(snapshot)).await.is_err() {
                return;
            }
        }

        if let Some(change) = change {
            sub.publish(
                &channel::level2(book.product_id()),
                ChannelMessage::Level2(change),
            );
        }
    }
}

/// Persist snapshots. A failed write is only logged: the next cadence
/// point produces a fresh snapshot, and snapshots are an optimization,
/// not a correctness requirement.
async fn run_snapshot_writer(
    depth_store: Arc<dyn DepthSnapshotStore>,
    mut snapshot_rx: mpsc::Receiver<SnapshotJob>,
) {
    while let Some(job) = snapshot_rx.recv().await {
        let result = match &job {
            SnapshotJob::Level2(snapshot) => depth_store.store_level2(snapshot),
            SnapshotJob::Full(snapshot) => depth_store.store_full(snapshot),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "depth snapshot store failed");
        }
    }
}
