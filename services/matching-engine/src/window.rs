//! Sliding dedup window over order ids
//!
//! The order source delivers at-least-once, so the engine must recognize
//! ids it has already ingested. Ids are monotonic, which lets a fixed
//! bitmap over the range `(min, max]` stand in for a full seen-set:
//! anything at or below `min` is treated as already seen, anything above
//! `max` slides the window forward.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default window width; idempotence is bounded to this many in-flight
/// order ids.
pub const ORDER_ID_WINDOW_CAP: u64 = 10_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("expired order id {val}, current window ({min}, {max}]")]
    Expired { val: u64, min: u64, max: u64 },

    #[error("duplicate order id {val}")]
    Duplicate { val: u64 },
}

/// Fixed-size bit array indexed modulo the window capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitmap {
    bits: Vec<u8>,
}

impl Bitmap {
    fn new(len: u64) -> Self {
        Self {
            bits: vec![0u8; len.div_ceil(8) as usize],
        }
    }

    fn get(&self, i: u64) -> bool {
        self.bits[(i / 8) as usize] & (1 << (i % 8)) != 0
    }

    fn set(&mut self, i: u64, v: bool) {
        let byte = (i / 8) as usize;
        let bit = 1u8 << (i % 8);
        if v {
            self.bits[byte] |= bit;
        } else {
            self.bits[byte] &= !bit;
        }
    }

    fn clear(&mut self) {
        self.bits.fill(0);
    }
}

/// Membership window over order ids in `(min, max]` with `max - min == cap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    min: u64,
    max: u64,
    cap: u64,
    bitmap: Bitmap,
}

impl Window {
    pub fn new(min: u64, cap: u64) -> Self {
        Self {
            min,
            max: min + cap,
            cap,
            bitmap: Bitmap::new(cap),
        }
    }

    pub fn cap(&self) -> u64 {
        self.cap
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// Record `val` as seen.
    ///
    /// Fails if `val` is at or below the window (expired, indistinguishable
    /// from already-seen) or if its bit is already set (duplicate). A value
    /// above the window slides `(min, max]` forward; the slots taken over
    /// from ids that just fell out of range are cleared before the new bit
    /// is set, since the bitmap itself is never rotated.
    pub fn put(&mut self, val: u64) -> Result<(), WindowError> {
        if val <= self.min {
            return Err(WindowError::Expired {
                val,
                min: self.min,
                max: self.max,
            });
        }

        if val > self.max {
            let delta = val - self.max;
            if delta >= self.cap {
                self.bitmap.clear();
            } else {
                for reclaimed in (self.max + 1)..val {
                    self.bitmap.set(reclaimed % self.cap, false);
                }
            }
            self.min += delta;
            self.max += delta;
            self.bitmap.set(val % self.cap, true);
            return Ok(());
        }

        if self.bitmap.get(val % self.cap) {
            return Err(WindowError::Duplicate { val });
        }
        self.bitmap.set(val % self.cap, true);
        Ok(())
    }
}
