//! Sequential reader for the file event log
//!
//! Decodes frames in order, validating checksums on every read. This is a
//! catch-up reader: `poll_next` returns `None` at the current end of file
//! and can be polled again after the writer appends more (live tailing is
//! layered on top by the caller).

use crate::journal::{decode_frame, LogError};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Reads one instrument's event log from the beginning or a given offset.
pub struct FileEventLogReader {
    path: PathBuf,
    /// Byte position of the next frame to decode.
    byte_pos: u64,
    /// Deliver only entries with offset >= this.
    start_offset: u64,
}

impl FileEventLogReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        Ok(Self {
            path: path.into(),
            byte_pos: 0,
            start_offset: 0,
        })
    }

    /// Position the reader so the next delivered entry has
    /// `offset >= offset`. Rewinds to the file start; skipping happens
    /// frame-by-frame on the next poll.
    pub fn set_offset(&mut self, offset: u64) {
        self.byte_pos = 0;
        self.start_offset = offset;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode the next frame, or `None` if the log has no more complete
    /// frames right now.
    pub fn poll_next(&mut self) -> Result<Option<(u64, Vec<u8>)>, LogError> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            // The writer may not have created the file yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        if self.byte_pos >= len {
            return Ok(None);
        }

        file.seek(SeekFrom::Start(self.byte_pos))?;
        let mut data = Vec::with_capacity((len - self.byte_pos) as usize);
        file.read_to_end(&mut data)?;

        let mut pos = 0usize;
        loop {
            match decode_frame(&data[pos..], self.byte_pos + pos as u64)? {
                Some((offset, payload, consumed)) => {
                    pos += consumed;
                    if offset < self.start_offset {
                        continue; // still seeking
                    }
                    self.byte_pos += pos as u64;
                    return Ok(Some((offset, payload)));
                }
                // Incomplete tail: the writer is mid-append. Skip what we
                // consumed so far and retry later.
                None => {
                    self.byte_pos += pos as u64;
                    return Ok(None);
                }
            }
        }
    }
}
