// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Lock-free receive ring written from interrupt context and drained by one task.
// Author: Lukas Bower

//! Single-producer/single-consumer byte ring with an overwrite-oldest policy.
//!
//! The producer is the UART receive interrupt and the consumer is the bridge
//! worker. Neither side takes a lock. Positions are monotonically increasing
//! 64-bit counters; the cursors of the data model are those positions modulo
//! the capacity, and the overlap flag is set while the write position is a
//! lap ahead of the read position:
//!
//! - `write_cursor = head % C`, `read_cursor = tail % C`
//! - `overlap = head / C > tail / C`
//! - unread bytes `= head - tail`, never more than `C`
//!
//! When the ring is full the producer first claims the oldest unread slot by
//! advancing `tail` with a compare-and-swap and only then overwrites it. The
//! consumer copies a window and commits it with a compare-and-swap on `tail`;
//! if the producer reclaimed a slot in the meantime the commit fails and the
//! consumer copies again, so a drain never returns a byte that was overwritten
//! after it was claimed as unread.

#[cfg(loom)]
use loom::sync::atomic::{AtomicU64, AtomicU8, Ordering};
#[cfg(not(loom))]
use portable_atomic::{AtomicU64, AtomicU8, Ordering};

use thiserror::Error;

/// Largest supported ring capacity.
pub const MAX_CAPACITY: usize = 1 << 24;

/// Errors raised when constructing a ring.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Capacity is zero or above [`MAX_CAPACITY`].
    #[error("ring capacity {requested} outside 1..={max}")]
    Capacity {
        /// Capacity requested by the caller.
        requested: usize,
        /// Largest supported capacity.
        max: usize,
    },
}

/// Snapshot of the ring cursors in data-model terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCursors {
    /// Next index the producer writes.
    pub write_cursor: usize,
    /// Next index the consumer reads.
    pub read_cursor: usize,
    /// Write position is a lap ahead of the read position.
    pub overlap: bool,
    /// Unread bytes.
    pub available: usize,
}

/// Fixed-capacity receive ring.
#[derive(Debug)]
pub struct RingBuffer {
    storage: Box<[AtomicU8]>,
    capacity: u64,
    head: AtomicU64,
    tail: AtomicU64,
    last_update: AtomicU64,
    overwritten: AtomicU64,
}

impl RingBuffer {
    /// Allocate a zeroed ring with both cursors at index 0.
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(RingError::Capacity {
                requested: capacity,
                max: MAX_CAPACITY,
            });
        }
        let storage = (0..capacity)
            .map(|_| AtomicU8::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            storage,
            capacity: capacity as u64,
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            last_update: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
        })
    }

    /// Ring capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Append one byte. Producer side only; never blocks or allocates.
    ///
    /// A full ring sacrifices its oldest unread byte.
    pub fn append(&self, byte: u8, tick: u64) {
        let head = self.head.load(Ordering::Relaxed);
        let mut tail = self.tail.load(Ordering::Acquire);
        while head - tail >= self.capacity {
            match self.tail.compare_exchange(
                tail,
                head + 1 - self.capacity,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.overwritten.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Err(current) => tail = current,
            }
        }
        self.storage[self.index(head)].store(byte, Ordering::Relaxed);
        self.head.store(head + 1, Ordering::Release);
        self.last_update.store(tick, Ordering::Release);
    }

    /// Copy up to `out.len()` unread bytes into `out`, oldest first.
    ///
    /// Consumer side only. Returns the number of bytes copied; zero means no
    /// data is currently available and leaves the cursors untouched.
    pub fn drain(&self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        let mut tail = self.tail.load(Ordering::Acquire);
        loop {
            let head = self.head.load(Ordering::Acquire);
            let available = head - tail;
            let len = available.min(out.len() as u64) as usize;
            if len == 0 {
                return 0;
            }

            let start = self.index(tail);
            let first = (self.storage.len() - start).min(len);
            for (dst, slot) in out[..first].iter_mut().zip(&self.storage[start..]) {
                *dst = slot.load(Ordering::Relaxed);
            }
            for (dst, slot) in out[first..len].iter_mut().zip(self.storage.iter()) {
                *dst = slot.load(Ordering::Relaxed);
            }

            match self.tail.compare_exchange(
                tail,
                tail + len as u64,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return len,
                Err(current) => tail = current,
            }
        }
    }

    /// Unread byte count.
    #[must_use]
    pub fn available(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.saturating_sub(tail) as usize
    }

    /// Cursor snapshot in data-model terms.
    #[must_use]
    pub fn cursors(&self) -> RingCursors {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        RingCursors {
            write_cursor: self.index(head),
            read_cursor: self.index(tail),
            overlap: head / self.capacity > tail / self.capacity,
            available: head.saturating_sub(tail) as usize,
        }
    }

    /// Tick of the most recent append.
    #[must_use]
    pub fn last_update_tick(&self) -> u64 {
        self.last_update.load(Ordering::Acquire)
    }

    /// Total bytes appended since the ring was allocated.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.head.load(Ordering::Relaxed)
    }

    /// Bytes discarded unread by the overwrite policy.
    #[must_use]
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    fn index(&self, position: u64) -> usize {
        (position % self.capacity) as usize
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    fn filled(capacity: usize, bytes: impl IntoIterator<Item = u8>) -> RingBuffer {
        let ring = RingBuffer::new(capacity).unwrap();
        for (tick, byte) in bytes.into_iter().enumerate() {
            ring.append(byte, tick as u64);
        }
        ring
    }

    #[test]
    fn rejects_out_of_range_capacity() {
        assert!(RingBuffer::new(0).is_err());
        assert!(RingBuffer::new(MAX_CAPACITY + 1).is_err());
        assert_eq!(RingBuffer::new(16).unwrap().capacity(), 16);
    }

    #[test]
    fn cursors_stay_in_range_across_wraps() {
        let ring = RingBuffer::new(5).unwrap();
        for byte in 0..=255u8 {
            ring.append(byte, u64::from(byte));
            let cursors = ring.cursors();
            assert!(cursors.write_cursor < 5);
            assert!(cursors.read_cursor < 5);
            assert!(cursors.available <= 5);
            if byte % 3 == 0 {
                let mut out = [0u8; 2];
                ring.drain(&mut out);
            }
        }
    }

    #[test]
    fn drain_returns_bytes_in_order_without_overlap() {
        let ring = filled(16, 1..=10);
        assert!(!ring.cursors().overlap);
        let mut out = [0u8; 10];
        assert_eq!(ring.drain(&mut out), 10);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn partial_drain_respects_caller_length() {
        let ring = filled(16, 1..=6);
        let mut out = [0u8; 4];
        assert_eq!(ring.drain(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(ring.drain(&mut out), 2);
        assert_eq!(&out[..2], &[5, 6]);
    }

    #[test]
    fn overflow_keeps_most_recent_capacity_bytes() {
        let ring = filled(16, 1..=20);
        let cursors = ring.cursors();
        assert!(cursors.overlap);
        assert_eq!(cursors.write_cursor, 4);
        assert_eq!(cursors.read_cursor, 4);
        assert_eq!(cursors.available, 16);
        assert_eq!(ring.overwritten(), 4);
        assert_eq!(ring.received(), 20);

        let mut out = [0u8; 16];
        assert_eq!(ring.drain(&mut out), 16);
        let expected: Vec<u8> = (5..=20).collect();
        assert_eq!(out.as_slice(), expected.as_slice());

        let cursors = ring.cursors();
        assert!(!cursors.overlap);
        assert_eq!(cursors.available, 0);

        ring.append(0xAA, 21);
        ring.append(0xBB, 22);
        let mut out = [0u8; 8];
        assert_eq!(ring.drain(&mut out), 2);
        assert_eq!(&out[..2], &[0xAA, 0xBB]);
    }

    #[test]
    fn drain_reassembles_across_wrap_boundary() {
        let ring = RingBuffer::new(8).unwrap();
        for byte in 0..6 {
            ring.append(byte, 0);
        }
        let mut out = [0u8; 6];
        assert_eq!(ring.drain(&mut out), 6);

        for byte in 10..16 {
            ring.append(byte, 0);
        }
        let cursors = ring.cursors();
        assert_eq!(cursors.read_cursor, 6);
        assert_eq!(cursors.write_cursor, 4);
        assert!(cursors.overlap);

        let mut out = [0u8; 8];
        assert_eq!(ring.drain(&mut out), 6);
        assert_eq!(&out[..6], &[10, 11, 12, 13, 14, 15]);
        assert!(!ring.cursors().overlap);
    }

    #[test]
    fn empty_drain_is_idempotent() {
        let ring = filled(8, 1..=3);
        let mut out = [0u8; 8];
        ring.drain(&mut out);
        let before = ring.cursors();
        assert_eq!(ring.drain(&mut out), 0);
        assert_eq!(ring.drain(&mut []), 0);
        assert_eq!(ring.cursors(), before);
    }

    #[test]
    fn append_records_last_update_tick() {
        let ring = RingBuffer::new(4).unwrap();
        assert_eq!(ring.last_update_tick(), 0);
        ring.append(1, 42);
        assert_eq!(ring.last_update_tick(), 42);
    }

    #[test]
    fn exactly_full_ring_is_readable_in_full() {
        let ring = filled(4, [9, 8, 7, 6]);
        let cursors = ring.cursors();
        assert!(cursors.overlap);
        assert_eq!(cursors.available, 4);
        assert_eq!(ring.overwritten(), 0);
        let mut out = [0u8; 4];
        assert_eq!(ring.drain(&mut out), 4);
        assert_eq!(out, [9, 8, 7, 6]);
    }

    #[test]
    fn concurrent_producer_never_yields_stale_or_reordered_bytes() {
        use std::sync::Arc;
        use std::thread;

        let ring = Arc::new(RingBuffer::new(64).unwrap());
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for value in 0..20_000u32 {
                    ring.append((value % 251) as u8, u64::from(value));
                }
            })
        };

        let mut delivered = 0u64;
        let mut out = [0u8; 32];
        while !producer.is_finished() || ring.available() > 0 {
            let len = ring.drain(&mut out);
            // A committed window is contiguous producer output.
            for pair in out[..len].windows(2) {
                assert_eq!(pair[1], ((u32::from(pair[0]) + 1) % 251) as u8);
            }
            delivered += len as u64;
        }
        producer.join().unwrap();

        assert_eq!(delivered + ring.overwritten(), ring.received());
    }
}
