//! Durability layer for the matching core
//!
//! Provides the two storage shapes everything else is built on:
//!
//! - an append-only, offset-addressed event log (file-backed with CRC32C
//!   framing, plus an in-memory equivalent for tests and single-process
//!   deployments), and
//! - a key/value blob store with TTL semantics for engine and depth
//!   snapshots.
//!
//! This crate stores opaque payload bytes; serialization of the domain
//! types happens in the crates that own them.

pub mod journal;
pub mod kv;
pub mod memory;
pub mod reader;

pub use journal::{FileEventLog, LogError};
pub use kv::{BlobStore, FileBlobStore, KvError, MemoryBlobStore};
pub use memory::{MemoryLog, MemoryLogReader};
pub use reader::FileEventLogReader;
