// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Counters describing bridge throughput and failures.
// Author: Lukas Bower

//! Bridge telemetry.
//!
//! Counters are updated from the worker, the write path and transmit
//! completions; all updates are relaxed atomic increments so interrupt context
//! can bump them too.

use portable_atomic::{AtomicU64, Ordering};

/// Point-in-time view of the bridge counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeTelemetry {
    /// Bytes appended to the receive ring.
    pub received: u64,
    /// Bytes discarded unread by the ring overwrite policy.
    pub overwritten: u64,
    /// Bytes accepted by the sink.
    pub forwarded: u64,
    /// Bytes written to the serial line.
    pub transmitted: u64,
    /// Sink delivery failures.
    pub send_errors: u64,
    /// Writes rejected because the transmit gate stayed busy.
    pub busy_rejections: u64,
    /// Completed drain cycles.
    pub drain_cycles: u64,
    /// Receive errors reported by the serial driver.
    pub rx_errors: u64,
    /// Transmit failures reported by the serial driver.
    pub tx_errors: u64,
}

/// Shared counters behind [`BridgeTelemetry`].
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    forwarded: AtomicU64,
    transmitted: AtomicU64,
    send_errors: AtomicU64,
    busy_rejections: AtomicU64,
    drain_cycles: AtomicU64,
    rx_errors: AtomicU64,
    tx_errors: AtomicU64,
}

impl TelemetryCounters {
    /// Snapshot the counters, merged with the ring's own accounting.
    #[must_use]
    pub fn snapshot(&self, received: u64, overwritten: u64) -> BridgeTelemetry {
        BridgeTelemetry {
            received,
            overwritten,
            forwarded: self.forwarded.load(Ordering::Relaxed),
            transmitted: self.transmitted.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
            drain_cycles: self.drain_cycles.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
        }
    }

    /// Count bytes accepted by the sink.
    pub fn record_forwarded(&self, bytes: usize) {
        self.forwarded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count bytes written to the serial line.
    pub fn record_transmitted(&self, bytes: usize) {
        self.transmitted.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count a failed sink delivery.
    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a write rejected as busy.
    pub fn record_busy(&self) {
        self.busy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a completed drain cycle.
    pub fn record_drain_cycle(&self) {
        self.drain_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a driver receive error.
    pub fn record_rx_error(&self) {
        self.rx_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a driver transmit failure.
    pub fn record_tx_error(&self) {
        self.tx_errors.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_merges_ring_accounting() {
        let counters = TelemetryCounters::default();
        counters.record_forwarded(12);
        counters.record_forwarded(3);
        counters.record_busy();
        counters.record_drain_cycle();
        let snapshot = counters.snapshot(20, 4);
        assert_eq!(snapshot.received, 20);
        assert_eq!(snapshot.overwritten, 4);
        assert_eq!(snapshot.forwarded, 15);
        assert_eq!(snapshot.busy_rejections, 1);
        assert_eq!(snapshot.drain_cycles, 1);
        assert_eq!(snapshot.send_errors, 0);
    }
}
