// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Receive ring cursor and overwrite behaviour through the public API.
// Author: Lukas Bower
#![cfg(not(loom))]

use std::collections::VecDeque;

use uart_bridge::ring::MAX_CAPACITY;
use uart_bridge::{RingBuffer, RingCursors, RingError};

/// Small deterministic generator so failures replay.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    fn below(&mut self, bound: u64) -> usize {
        (self.next() % bound) as usize
    }
}

#[test]
fn twenty_bytes_into_sixteen() {
    let ring = RingBuffer::new(16).unwrap();
    for byte in 1..=20u8 {
        ring.append(byte, u64::from(byte));
    }
    assert_eq!(
        ring.cursors(),
        RingCursors {
            write_cursor: 4,
            read_cursor: 4,
            overlap: true,
            available: 16,
        }
    );
    assert_eq!(ring.last_update_tick(), 20);

    let mut out = [0u8; 32];
    let len = ring.drain(&mut out);
    assert_eq!(&out[..len], (5..=20).collect::<Vec<u8>>().as_slice());
    assert!(!ring.cursors().overlap);
    assert_eq!(ring.overwritten(), 4);
}

#[test]
fn capacity_limits_are_enforced() {
    assert_eq!(
        RingBuffer::new(0).unwrap_err(),
        RingError::Capacity {
            requested: 0,
            max: MAX_CAPACITY,
        }
    );
    assert!(RingBuffer::new(MAX_CAPACITY + 1).is_err());
    assert_eq!(RingBuffer::new(1).unwrap().capacity(), 1);
}

#[test]
fn single_slot_ring_keeps_the_newest_byte() {
    let ring = RingBuffer::new(1).unwrap();
    ring.append(b'a', 1);
    ring.append(b'b', 2);
    let mut out = [0u8; 4];
    assert_eq!(ring.drain(&mut out), 1);
    assert_eq!(out[0], b'b');
    assert_eq!(ring.overwritten(), 1);
}

#[test]
fn random_traffic_matches_a_bounded_queue() {
    const CAPACITY: usize = 13;

    let ring = RingBuffer::new(CAPACITY).unwrap();
    let mut model: VecDeque<u8> = VecDeque::with_capacity(CAPACITY);
    let mut rng = Lcg(0x5eed);
    let mut next_byte = 0u8;
    let mut drained_total = 0u64;
    let mut out = [0u8; 2 * CAPACITY];

    for step in 0..2_000u64 {
        if rng.below(3) == 0 {
            let want = rng.below(out.len() as u64) + 1;
            let len = ring.drain(&mut out[..want]);
            let expected: Vec<u8> = model.drain(..len.min(model.len())).collect();
            assert_eq!(&out[..len], expected.as_slice(), "step {step}");
            assert_eq!(len, want.min(len + model.len()), "step {step}");
            drained_total += len as u64;
        } else {
            for _ in 0..rng.below(2 * CAPACITY as u64) {
                ring.append(next_byte, step);
                if model.len() == CAPACITY {
                    model.pop_front();
                }
                model.push_back(next_byte);
                next_byte = next_byte.wrapping_add(1);
            }
        }

        let cursors = ring.cursors();
        assert_eq!(cursors.available, model.len(), "step {step}");
        assert!(cursors.available <= CAPACITY);
        let lapped = (cursors.write_cursor + CAPACITY - cursors.read_cursor) % CAPACITY;
        assert_eq!(lapped, cursors.available % CAPACITY, "step {step}");
        if cursors.available == 0 {
            assert!(!cursors.overlap);
        }
        assert_eq!(
            drained_total + ring.overwritten() + cursors.available as u64,
            ring.received(),
            "step {step}"
        );
    }
}
