//! In-memory append-only log
//!
//! Backs the order source and event log contracts in tests and
//! single-process deployments. Offsets are 1-based like the file log;
//! readers block on `next` until an entry is available.

use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

struct Inner<T> {
    entries: RwLock<Vec<T>>,
    notify: Notify,
}

/// A shared, append-only, offset-addressed sequence of entries.
///
/// Cheap to clone; all clones view the same log.
pub struct MemoryLog<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for MemoryLog<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> MemoryLog<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Append a single entry, waking blocked readers.
    pub fn append(&self, entry: T) {
        self.inner.entries.write().unwrap().push(entry);
        self.inner.notify.notify_waiters();
    }

    /// Append a batch atomically, in order, waking blocked readers.
    pub fn append_batch(&self, batch: impl IntoIterator<Item = T>) {
        let mut entries = self.inner.entries.write().unwrap();
        entries.extend(batch);
        drop(entries);
        self.inner.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all entries, for test assertions.
    pub fn entries(&self) -> Vec<T> {
        self.inner.entries.read().unwrap().clone()
    }

    /// A new reader positioned at the start of the log.
    pub fn reader(&self) -> MemoryLogReader<T> {
        MemoryLogReader {
            log: self.clone(),
            pos: 0,
        }
    }
}

impl<T: Clone> Default for MemoryLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A cursor over a [`MemoryLog`].
pub struct MemoryLogReader<T> {
    log: MemoryLog<T>,
    /// Index of the next entry to deliver; delivered offset is `pos + 1`.
    pos: usize,
}

impl<T: Clone> MemoryLogReader<T> {
    /// Position the reader so the next delivered entry has
    /// `offset >= offset`.
    pub fn set_offset(&mut self, offset: u64) {
        self.pos = offset.saturating_sub(1) as usize;
    }

    /// Block until the next entry is available.
    pub async fn next(&mut self) -> (u64, T) {
        loop {
            // Register for wakeup before checking, so an append between
            // the check and the await cannot be lost.
            let notified = self.log.inner.notify.notified();
            {
                let entries = self.log.inner.entries.read().unwrap();
                if self.pos < entries.len() {
                    let offset = (self.pos + 1) as u64;
                    let entry = entries[self.pos].clone();
                    self.pos += 1;
                    return (offset, entry);
                }
            }
            notified.await;
        }
    }

    /// Non-blocking variant; `None` when caught up.
    pub fn try_next(&mut self) -> Option<(u64, T)> {
        let entries = self.log.inner.entries.read().unwrap();
        if self.pos < entries.len() {
            let offset = (self.pos + 1) as u64;
            let entry = entries[self.pos].clone();
            self.pos += 1;
            Some((offset, entry))
        } else {
            None
        }
    }
}
