// SPDX-License-Identifier: GPL-3.0-only

//! Write coalescing buffer.
//!
//! Pending writes are kept as (offset, bytes) pairs. An incoming write is
//! merged with a pending one when their byte ranges are contiguous or
//! overlapping and the combined span stays below the configured maximum.
//! Merging is a byte-range union with the newer bytes taking precedence on
//! overlap. Draining yields the pending entries in FIFO order of first
//! touch; the caller issues exactly one worker write per entry.

use std::time::{Duration, Instant};

use tdisk_types::ByteRange;

/// One pending coalesced write
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub offset: u64,
    pub data: Vec<u8>,

    /// Arrival number of the first write merged into this entry; drains
    /// are ordered by it.
    first_touch: u64,
}

impl PendingWrite {
    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.offset, self.offset + self.data.len() as u64)
    }
}

/// Whether `incoming` may be merged into `pending`: the ranges touch
/// (contiguous or overlapping) and the union span does not exceed
/// `max_span` bytes.
pub fn can_be_combined(pending: &PendingWrite, offset: u64, length: usize, max_span: usize) -> bool {
    let incoming = ByteRange::new(offset, offset + length as u64);
    let pending_range = pending.range();

    pending_range.touches(&incoming) && pending_range.union(&incoming).size() <= max_span as u64
}

pub struct WriteBuffer {
    max_span: usize,
    max_buffered: usize,
    pending: Vec<PendingWrite>,
    arrivals: u64,
    last_touch: Instant,
}

impl WriteBuffer {
    pub fn new(max_span: usize, max_buffered: usize) -> Self {
        Self {
            max_span,
            max_buffered,
            pending: Vec::new(),
            arrivals: 0,
            last_touch: Instant::now(),
        }
    }

    /// Total buffered bytes
    pub fn size(&self) -> usize {
        self.pending.iter().map(|entry| entry.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Time since the buffer was last appended to or drained
    pub fn age(&self) -> Duration {
        self.last_touch.elapsed()
    }

    /// Merges or appends one write. Returns true when the buffer has
    /// reached its maximum size and should be drained now.
    pub fn append(&mut self, offset: u64, data: Vec<u8>) -> bool {
        self.last_touch = Instant::now();
        self.arrivals += 1;

        let slot = self
            .pending
            .iter()
            .position(|entry| can_be_combined(entry, offset, data.len(), self.max_span));

        match slot {
            Some(slot) => {
                let merged = merge(&self.pending[slot], offset, data);
                self.pending[slot] = merged;
            }
            None => self.pending.push(PendingWrite {
                offset,
                data,
                first_touch: self.arrivals,
            }),
        }

        self.size() >= self.max_buffered
    }

    /// Moves all pending entries out, FIFO by first touch. Draining an
    /// empty buffer is a no-op yielding nothing.
    pub fn get_and_pop(&mut self) -> Vec<PendingWrite> {
        self.last_touch = Instant::now();

        let mut drained = std::mem::take(&mut self.pending);
        drained.sort_by_key(|entry| entry.first_touch);
        drained
    }

    /// Serves a read from pending bytes when one entry fully covers the
    /// requested range. Gives writers read-back visibility before the
    /// drain reaches the worker.
    pub fn read(&self, offset: u64, length: usize) -> Option<Vec<u8>> {
        let wanted = ByteRange::new(offset, offset + length as u64);

        self.pending.iter().find_map(|entry| {
            let range = entry.range();
            if range.start <= wanted.start && wanted.end <= range.end {
                let start = (wanted.start - range.start) as usize;
                Some(entry.data[start..start + length].to_vec())
            } else {
                None
            }
        })
    }
}

/// Byte-range union of a pending entry and an incoming write; the newer
/// bytes win wherever the ranges overlap.
fn merge(pending: &PendingWrite, offset: u64, data: Vec<u8>) -> PendingWrite {
    let union = pending.range().union(&ByteRange::new(
        offset,
        offset + data.len() as u64,
    ));

    let mut merged = vec![0u8; union.size() as usize];

    let old_start = (pending.offset - union.start) as usize;
    merged[old_start..old_start + pending.data.len()].copy_from_slice(&pending.data);

    let new_start = (offset - union.start) as usize;
    merged[new_start..new_start + data.len()].copy_from_slice(&data);

    PendingWrite {
        offset: union.start,
        data: merged,
        first_touch: pending.first_touch,
    }
}
