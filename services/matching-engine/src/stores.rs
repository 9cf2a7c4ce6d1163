//! Store implementations for the engine contracts
//!
//! In-memory order source and event log for tests and single-process
//! deployments, plus file-backed adapters over the durability layer for
//! standalone operation. Event payloads are stored in the wire JSON, so a
//! log file can be inspected (or consumed by another process) directly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use persistence::{BlobStore, FileEventLog, FileEventLogReader, MemoryLog, MemoryLogReader};
use types::Order;

use crate::api::{EngineSnapshot, LogReader, LogStore, OrderReader, SnapshotStore, StoreError};
use crate::log::LogEntry;

/// Snapshots refresh every snapshot interval; anything older than a week
/// is stale enough to discard.
const SNAPSHOT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn storage_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

// ── In-memory order source ──────────────────────────────────────────

/// Shared in-memory order stream. Appenders and readers all see the same
/// 1-based offsets.
#[derive(Clone, Default)]
pub struct MemoryOrderSource {
    log: MemoryLog<Order>,
}

impl MemoryOrderSource {
    pub fn new() -> Self {
        Self {
            log: MemoryLog::new(),
        }
    }

    pub fn append(&self, order: Order) {
        self.log.append(order);
    }

    pub fn reader(&self) -> MemoryOrderReader {
        MemoryOrderReader {
            inner: self.log.reader(),
        }
    }
}

pub struct MemoryOrderReader {
    inner: MemoryLogReader<Order>,
}

#[async_trait]
impl OrderReader for MemoryOrderReader {
    async fn set_offset(&mut self, offset: u64) -> Result<(), StoreError> {
        self.inner.set_offset(offset);
        Ok(())
    }

    async fn fetch_order(&mut self) -> Result<(u64, Order), StoreError> {
        Ok(self.inner.next().await)
    }
}

// ── In-memory event log ─────────────────────────────────────────────

/// Shared in-memory event log; the write half implements [`LogStore`]
/// and any number of readers can tail it live.
#[derive(Clone, Default)]
pub struct MemoryEventLog {
    log: MemoryLog<LogEntry>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self {
            log: MemoryLog::new(),
        }
    }

    pub fn reader(&self) -> MemoryEventLogReader {
        MemoryEventLogReader {
            inner: self.log.reader(),
        }
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Copy of all stored events, for assertions.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.log.entries()
    }
}

#[async_trait]
impl LogStore for MemoryEventLog {
    async fn store(&self, batch: &[LogEntry]) -> Result<(), StoreError> {
        self.log.append_batch(batch.iter().cloned());
        Ok(())
    }
}

pub struct MemoryEventLogReader {
    inner: MemoryLogReader<LogEntry>,
}

#[async_trait]
impl LogReader for MemoryEventLogReader {
    async fn set_offset(&mut self, offset: u64) -> Result<(), StoreError> {
        self.inner.set_offset(offset);
        Ok(())
    }

    async fn next(&mut self) -> Result<(u64, LogEntry), StoreError> {
        Ok(self.inner.next().await)
    }
}

// ── File-backed event log ───────────────────────────────────────────

/// [`LogStore`] over an append-only framed log file.
pub struct FileLogStore {
    log: Mutex<FileEventLog>,
}

impl FileLogStore {
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self, StoreError> {
        let log = FileEventLog::open(path.into()).map_err(storage_err)?;
        Ok(Self {
            log: Mutex::new(log),
        })
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn store(&self, batch: &[LogEntry]) -> Result<(), StoreError> {
        let mut payloads = Vec::with_capacity(batch.len());
        for entry in batch {
            payloads.push(serde_json::to_vec(entry).map_err(storage_err)?);
        }
        self.log
            .lock()
            .unwrap()
            .append_batch(&payloads)
            .map_err(storage_err)?;
        Ok(())
    }
}

/// [`LogReader`] over the framed log file; tails by polling.
pub struct FileLogReader {
    inner: FileEventLogReader,
    poll_interval: Duration,
}

impl FileLogReader {
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self, StoreError> {
        let inner = FileEventLogReader::open(path.into()).map_err(storage_err)?;
        Ok(Self {
            inner,
            poll_interval: Duration::from_millis(20),
        })
    }
}

#[async_trait]
impl LogReader for FileLogReader {
    async fn set_offset(&mut self, offset: u64) -> Result<(), StoreError> {
        self.inner.set_offset(offset);
        Ok(())
    }

    async fn next(&mut self) -> Result<(u64, LogEntry), StoreError> {
        loop {
            match self.inner.poll_next().map_err(storage_err)? {
                Some((offset, payload)) => {
                    let entry: LogEntry =
                        serde_json::from_slice(&payload).map_err(storage_err)?;
                    return Ok((offset, entry));
                }
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

// ── Blob-backed snapshot store ──────────────────────────────────────

/// [`SnapshotStore`] over any key/value blob store, one key per
/// instrument.
pub struct BlobSnapshotStore {
    store: Arc<dyn BlobStore>,
    key: String,
}

impl BlobSnapshotStore {
    pub fn new(store: Arc<dyn BlobStore>, product_id: &str) -> Self {
        Self {
            store,
            key: format!("matching_snapshot_{}", product_id),
        }
    }
}

#[async_trait]
impl SnapshotStore for BlobSnapshotStore {
    async fn store(&self, snapshot: &EngineSnapshot) -> Result<(), StoreError> {
        let blob = serde_json::to_vec(snapshot).map_err(storage_err)?;
        self.store
            .put(&self.key, &blob, SNAPSHOT_TTL)
            .map_err(storage_err)
    }

    async fn get_latest(&self) -> Result<Option<EngineSnapshot>, StoreError> {
        match self.store.get(&self.key).map_err(storage_err)? {
            Some(blob) => {
                let snapshot = serde_json::from_slice(&blob).map_err(storage_err)?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }
}
