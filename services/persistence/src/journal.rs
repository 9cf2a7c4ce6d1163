//! Append-only file event log with CRC32C framing
//!
//! One log file per instrument. Entries are framed as
//!
//! ```text
//! [body_len: u32][offset: u64][payload: bytes][checksum: u32]
//! ```
//!
//! (all little-endian). `body_len` covers everything after itself,
//! `checksum` is CRC32C over `offset ++ payload`. Offsets are 1-based and
//! assigned by the writer; offset 0 means "nothing consumed yet" to
//! readers.
//!
//! A batch is serialized into a single buffer and handed to the OS in one
//! `write_all`, then flushed and fsynced, so a crash never leaves a
//! partially ordered batch, at worst a truncated final frame, which
//! `open` detects and trims.

use crc32c::crc32c;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Frame overhead past the length prefix: offset (8) + checksum (4).
const FRAME_FIXED: usize = 12;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt frame at byte {byte_pos}: {detail}")]
    Corruption { byte_pos: u64, detail: String },

    #[error("checksum mismatch at byte {byte_pos}, offset {offset}")]
    ChecksumMismatch { byte_pos: u64, offset: u64 },
}

/// Encode one frame into `buf`.
fn encode_frame(buf: &mut Vec<u8>, offset: u64, payload: &[u8]) {
    let body_len = (FRAME_FIXED + payload.len()) as u32;
    let mut crc_input = Vec::with_capacity(8 + payload.len());
    crc_input.extend_from_slice(&offset.to_le_bytes());
    crc_input.extend_from_slice(payload);
    let checksum = crc32c(&crc_input);

    buf.extend_from_slice(&body_len.to_le_bytes());
    buf.extend_from_slice(&offset.to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&checksum.to_le_bytes());
}

/// Decode one frame from `data`.
///
/// Returns `Ok(Some((offset, payload, bytes_consumed)))` on success and
/// `Ok(None)` when `data` ends before the frame does (the writer may be
/// mid-append). Implausible lengths and checksum mismatches are errors.
/// `byte_pos` is only used for error reporting.
pub(crate) fn decode_frame(
    data: &[u8],
    byte_pos: u64,
) -> Result<Option<(u64, Vec<u8>, usize)>, LogError> {
    if data.len() < 4 {
        return Ok(None);
    }
    let body_len = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    if body_len < FRAME_FIXED || body_len > 100_000_000 {
        return Err(LogError::Corruption {
            byte_pos,
            detail: format!("implausible body length {}", body_len),
        });
    }
    let total = 4 + body_len;
    if data.len() < total {
        return Ok(None);
    }

    let offset = u64::from_le_bytes(data[4..12].try_into().unwrap());
    let payload_end = 4 + body_len - 4;
    let payload = data[12..payload_end].to_vec();
    let stored = u32::from_le_bytes(data[payload_end..total].try_into().unwrap());

    let mut crc_input = Vec::with_capacity(8 + payload.len());
    crc_input.extend_from_slice(&offset.to_le_bytes());
    crc_input.extend_from_slice(&payload);
    if crc32c(&crc_input) != stored {
        return Err(LogError::ChecksumMismatch { byte_pos, offset });
    }

    Ok(Some((offset, payload, total)))
}

/// Append-only writer for a single instrument's event log.
pub struct FileEventLog {
    path: PathBuf,
    writer: BufWriter<File>,
    next_offset: u64,
}

impl FileEventLog {
    /// Open (or create) the log at `path`.
    ///
    /// Scans existing frames to recover the next offset. A truncated or
    /// corrupt tail frame is trimmed; corruption before the tail is an
    /// error because the log would be unreadable for replay.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut pos = 0usize;
        let mut next_offset = 1u64;
        while pos < data.len() {
            match decode_frame(&data[pos..], pos as u64) {
                Ok(Some((offset, _, consumed))) => {
                    next_offset = offset + 1;
                    pos += consumed;
                }
                // Incomplete or corrupt tail from an interrupted append;
                // trim it and continue from the last intact frame.
                Ok(None) | Err(_) => {
                    tracing::warn!(
                        path = %path.display(),
                        byte_pos = pos,
                        trimmed = data.len() - pos,
                        "trimming corrupt log tail"
                    );
                    file.set_len(pos as u64)?;
                    break;
                }
            }
        }
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            next_offset,
        })
    }

    /// Next offset that will be assigned.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a batch of payloads in order, as one durable write.
    ///
    /// Returns the offset assigned to the last payload.
    pub fn append_batch(&mut self, payloads: &[Vec<u8>]) -> Result<u64, LogError> {
        if payloads.is_empty() {
            return Ok(self.next_offset.saturating_sub(1));
        }

        let mut buf = Vec::new();
        for payload in payloads {
            encode_frame(&mut buf, self.next_offset, payload);
            self.next_offset += 1;
        }

        self.writer.write_all(&buf)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(self.next_offset - 1)
    }
}
