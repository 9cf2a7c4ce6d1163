//! Key/value blob store for snapshots
//!
//! Latest-wins semantics: `put` overwrites, `get` returns the most recent
//! blob or `None`. TTLs are advisory (snapshots are refreshed far more
//! often than they expire), but expired blobs are treated as absent so a
//! stale snapshot can never resurrect state after a long outage.

use dashmap::DashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt blob for key {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

/// Key/value blob storage with TTL.
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, blob: &[u8], ttl: Duration) -> Result<(), KvError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── File-backed store ───────────────────────────────────────────────

/// One file per key under a directory. Writes go to a temp file, get
/// fsynced, then rename into place, so readers never observe a torn blob.
///
/// File layout: `[expires_at_unix_ms: u64][blob]` with `0` meaning no
/// expiry.
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are instrument-derived and may contain separators.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            })
            .collect();
        self.dir.join(format!("{}.blob", safe))
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, key: &str, blob: &[u8], ttl: Duration) -> Result<(), KvError> {
        fs::create_dir_all(&self.dir)?;

        let expires_at = if ttl.is_zero() {
            0
        } else {
            now_millis() + ttl.as_millis() as u64
        };

        let path = self.path_for(key);
        let tmp_path = path.with_extension("blob.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&expires_at.to_le_bytes())?;
            file.write_all(blob)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let path = self.path_for(key);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        if data.len() < 8 {
            return Err(KvError::Corrupt {
                key: key.to_string(),
                detail: format!("blob shorter than header: {} bytes", data.len()),
            });
        }

        let expires_at = u64::from_le_bytes(data[0..8].try_into().unwrap());
        if expires_at != 0 && now_millis() >= expires_at {
            return Ok(None);
        }
        Ok(Some(data[8..].to_vec()))
    }
}

// ── In-memory store ─────────────────────────────────────────────────

/// Concurrent in-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryBlobStore {
    entries: DashMap<String, (Vec<u8>, u64)>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, blob: &[u8], ttl: Duration) -> Result<(), KvError> {
        let expires_at = if ttl.is_zero() {
            0
        } else {
            now_millis() + ttl.as_millis() as u64
        };
        self.entries
            .insert(key.to_string(), (blob.to_vec(), expires_at));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        match self.entries.get(key) {
            Some(entry) => {
                let (blob, expires_at) = entry.value();
                if *expires_at != 0 && now_millis() >= *expires_at {
                    Ok(None)
                } else {
                    Ok(Some(blob.clone()))
                }
            }
            None => Ok(None),
        }
    }
}
