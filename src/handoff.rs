// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Interrupt-context producer feeding the receive ring and waking the worker.
// Author: Lukas Bower

//! Receive interrupt handoff.
//!
//! Board glue calls [`InterruptHandoff::on_rx_interrupt`] from the UART receive
//! interrupt. Bytes land in the ring and the worker is woken once per burst:
//! the first byte after the worker cleared its pending flag gives the action
//! semaphore, later bytes of the same burst only append. The worker re-checks
//! the ring after clearing the flag, so a level-style wakeup is sufficient.
//!
//! Nothing here blocks, allocates or returns an error.

use std::sync::Arc;

use nb::Error as NbError;
use portable_atomic::{fence, Ordering};

use crate::serial::SerialRx;
use crate::worker::WorkerState;

/// Producer-side handle on a bridge's receive path.
#[derive(Clone)]
pub struct InterruptHandoff {
    state: Arc<WorkerState>,
}

impl InterruptHandoff {
    pub(crate) fn new(state: Arc<WorkerState>) -> Self {
        Self { state }
    }

    /// Append one received byte and wake the worker on the first byte of a burst.
    pub fn on_rx_byte(&self, byte: u8) {
        let state = &self.state;
        state.ring.append(byte, state.clock.now_ticks());
        fence(Ordering::SeqCst);
        if !state.rx_pending.swap(true, Ordering::SeqCst) {
            state.action.give_from_isr();
        }
    }

    /// Drain the receive FIFO of `rx` into the ring. Returns the bytes moved.
    pub fn on_rx_interrupt<R>(&self, rx: &mut R) -> usize
    where
        R: SerialRx + ?Sized,
    {
        let mut moved = 0;
        loop {
            match rx.read_byte() {
                Ok(byte) => {
                    self.on_rx_byte(byte);
                    moved += 1;
                }
                Err(NbError::WouldBlock) => break,
                Err(NbError::Other(_)) => {
                    self.state.telemetry.record_rx_error();
                    break;
                }
            }
        }
        moved
    }
}

impl core::fmt::Debug for InterruptHandoff {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterruptHandoff")
            .field("available", &self.state.ring.available())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::network::Descriptor;
    use crate::serial::loopback::LoopbackSerial;

    fn state() -> Arc<WorkerState> {
        let fd = Descriptor::new(0).unwrap();
        Arc::new(WorkerState::new(16, fd, Arc::new(SystemClock::new())).unwrap())
    }

    #[test]
    fn one_wakeup_per_burst() {
        let state = state();
        let handoff = InterruptHandoff::new(Arc::clone(&state));
        for byte in 1..=5 {
            handoff.on_rx_byte(byte);
        }
        assert!(state.action.try_take());
        assert!(!state.action.try_take());
        assert_eq!(state.ring.available(), 5);

        handoff.on_rx_byte(6);
        assert!(!state.action.try_take(), "burst still pending");

        state.rx_pending.store(false, Ordering::SeqCst);
        handoff.on_rx_byte(7);
        assert!(state.action.try_take(), "new burst wakes the worker");
    }

    #[test]
    fn interrupt_drains_fifo_until_empty() {
        let state = state();
        let handoff = InterruptHandoff::new(Arc::clone(&state));
        let serial = LoopbackSerial::new();
        serial.push_rx(b"abc");
        let mut irq_side = serial.clone();
        assert_eq!(handoff.on_rx_interrupt(&mut irq_side), 3);
        assert_eq!(handoff.on_rx_interrupt(&mut irq_side), 0);
        let mut out = [0u8; 8];
        assert_eq!(state.ring.drain(&mut out), 3);
        assert_eq!(&out[..3], b"abc");
    }
}
