//! Time-addressed row rings inside an archive file.
//!
//! Each band owns two columns in the data region of its archive: a timestamp
//! column and a value column, both `capacity` entries long. The slot of a row
//! is derived from its window start:
//!
//! ```text
//! slot = (window_start / step) % capacity
//! ```
//!
//! A row is only valid if its slot's timestamp equals the window start being
//! looked up. Empty slots hold `u64::MAX`; unknown rows hold NaN. Stale rows
//! from an earlier lap of the ring are therefore never mistaken for current
//! ones.

use crate::archive::{get_f64, get_u64, put_f64, put_u64};

/// Timestamp marking a slot that was never written.
pub(crate) const EMPTY_SLOT: u64 = u64::MAX;

/// Size of one timestamp entry.
pub(crate) const TIMESTAMP_SIZE: usize = 8;

/// Size of one value entry.
pub(crate) const VALUE_SIZE: usize = 8;

/// Location and shape of one band's ring within the archive bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ring {
    /// Row width in seconds.
    step: u64,
    /// Number of slots.
    capacity: u32,
    /// Byte offset of the timestamp column.
    timestamps_offset: usize,
    /// Byte offset of the value column.
    values_offset: usize,
}

impl Ring {
    pub(crate) fn new(step: u64, capacity: u32, timestamps_offset: usize) -> Self {
        Self {
            step,
            capacity,
            timestamps_offset,
            values_offset: timestamps_offset + capacity as usize * TIMESTAMP_SIZE,
        }
    }

    /// Bytes taken by both columns.
    pub(crate) fn byte_len(capacity: u32) -> usize {
        capacity as usize * (TIMESTAMP_SIZE + VALUE_SIZE)
    }

    /// Row width in seconds.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Number of slots.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)] // Bounded by capacity (u32)
    fn slot(&self, start: u64) -> usize {
        ((start / self.step) % u64::from(self.capacity)) as usize
    }

    fn timestamp_at(&self, slot: usize) -> usize {
        self.timestamps_offset + slot * TIMESTAMP_SIZE
    }

    fn value_at(&self, slot: usize) -> usize {
        self.values_offset + slot * VALUE_SIZE
    }

    /// Reads the row starting at `start`.
    ///
    /// Returns `None` if the slot holds a different window or the stored
    /// value is unknown.
    pub(crate) fn read(&self, bytes: &[u8], start: u64) -> Option<f64> {
        let slot = self.slot(start);
        if get_u64(bytes, self.timestamp_at(slot)) != start {
            return None;
        }
        let value = get_f64(bytes, self.value_at(slot));
        (!value.is_nan()).then_some(value)
    }

    /// Writes the row starting at `start`. `None` stores an unknown row.
    pub(crate) fn write(&self, bytes: &mut [u8], start: u64, value: Option<f64>) {
        let slot = self.slot(start);
        put_u64(bytes, self.timestamp_at(slot), start);
        put_f64(bytes, self.value_at(slot), value.unwrap_or(f64::NAN));
    }

    /// Marks every slot empty.
    pub(crate) fn clear(&self, bytes: &mut [u8]) {
        for slot in 0..self.capacity as usize {
            put_u64(bytes, self.timestamp_at(slot), EMPTY_SLOT);
            put_f64(bytes, self.value_at(slot), f64::NAN);
        }
    }

    /// Oldest and newest row start currently held, if any slot was written.
    pub(crate) fn written_range(&self, bytes: &[u8]) -> Option<(u64, u64)> {
        (0..self.capacity as usize)
            .map(|slot| get_u64(bytes, self.timestamp_at(slot)))
            .filter(|&ts| ts != EMPTY_SLOT)
            .fold(None, |range, ts| match range {
                None => Some((ts, ts)),
                Some((lo, hi)) => Some((lo.min(ts), hi.max(ts))),
            })
    }
}
