// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Bridge worker task moving receive bursts to the sink and transmit payloads to the UART.
// Author: Lukas Bower

//! Bridge worker.
//!
//! One dedicated thread per bridge. The loop blocks on the action semaphore,
//! waits for the receive line to go quiet, drains the ring into the sink and
//! pushes any staged transmit payload to the serial line. It beats its
//! heartbeat once per iteration, including idle wakeups after the heartbeat
//! interval, and exits when the descriptor sentinel is set.
//!
//! ```text
//! Idle -> WaitingSignal -> QuiesceWait -> Draining -> Idle
//!                       \-> Transmitting ----------/
//! any -> ShuttingDown -> Exited
//! ```

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, trace, warn};
use nb::Error as NbError;
use portable_atomic::{fence, AtomicBool, AtomicI32, AtomicU8, Ordering};

use crate::clock::{duration_to_ticks, Clock};
use crate::config::BridgeConfig;
use crate::network::{Descriptor, NetworkStack};
use crate::ring::{RingBuffer, RingError};
use crate::serial::{SerialError, SerialLine, TxCompletion};
use crate::sink::ByteSink;
use crate::sync::{BinarySemaphore, Heartbeat};
use crate::telemetry::TelemetryCounters;

/// Capacity of the transmit slot in bytes.
pub const TX_SLOT_CAPACITY: usize = 1400;

/// Largest chunk handed to the sink in one delivery.
pub const RX_CHUNK: usize = 1400;

/// Observable state of the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerPhase {
    /// Between iterations.
    Idle = 0,
    /// Blocked on the action semaphore.
    WaitingSignal = 1,
    /// Waiting for the receive line to go quiet.
    QuiesceWait = 2,
    /// Forwarding ring contents to the sink.
    Draining = 3,
    /// Pushing the transmit slot to the serial line.
    Transmitting = 4,
    /// Close observed; leaving the loop.
    ShuttingDown = 5,
    /// Loop finished and exit acknowledged.
    Exited = 6,
}

impl WorkerPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::WaitingSignal,
            2 => Self::QuiesceWait,
            3 => Self::Draining,
            4 => Self::Transmitting,
            5 => Self::ShuttingDown,
            6 => Self::Exited,
            _ => Self::Idle,
        }
    }
}

/// Payload staged for transmission.
pub(crate) type TxSlot = heapless::Vec<u8, TX_SLOT_CAPACITY>;

/// State shared by one bridge instance: the handle, the interrupt handoff and
/// the worker. A restart builds a new instance; nothing is reused.
pub(crate) struct WorkerState {
    pub(crate) ring: RingBuffer,
    pub(crate) action: BinarySemaphore,
    pub(crate) tx_gate: Arc<BinarySemaphore>,
    pub(crate) exited: BinarySemaphore,
    pub(crate) rx_pending: AtomicBool,
    pub(crate) tx_pending: AtomicBool,
    pub(crate) tx_slot: spin::Mutex<TxSlot>,
    pub(crate) telemetry: Arc<TelemetryCounters>,
    pub(crate) clock: Arc<dyn Clock>,
    descriptor: AtomicI32,
    phase: AtomicU8,
}

impl WorkerState {
    pub(crate) fn new(
        rx_capacity: usize,
        fd: Descriptor,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RingError> {
        Ok(Self {
            ring: RingBuffer::new(rx_capacity)?,
            action: BinarySemaphore::new(false),
            tx_gate: Arc::new(BinarySemaphore::new(true)),
            exited: BinarySemaphore::new(false),
            rx_pending: AtomicBool::new(false),
            tx_pending: AtomicBool::new(false),
            tx_slot: spin::Mutex::new(TxSlot::new()),
            telemetry: Arc::new(TelemetryCounters::default()),
            clock,
            descriptor: AtomicI32::new(fd.raw()),
            phase: AtomicU8::new(WorkerPhase::Idle as u8),
        })
    }

    /// Open descriptor, or `None` once the close sentinel is stored.
    pub(crate) fn descriptor(&self) -> Option<Descriptor> {
        Descriptor::new(self.descriptor.load(Ordering::Acquire))
    }

    /// Store the close sentinel. Returns the descriptor that was open, if any.
    pub(crate) fn mark_closed(&self) -> Option<Descriptor> {
        Descriptor::new(self.descriptor.swap(Descriptor::CLOSED, Ordering::AcqRel))
    }

    pub(crate) fn phase(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    quiet_ticks: u64,
    quiesce_limit_ticks: u64,
    quiesce_poll: Duration,
    tx_poll: Duration,
    heartbeat_interval: Duration,
    dma_tx: bool,
}

impl Timing {
    fn from_config(config: &BridgeConfig) -> Self {
        Self {
            quiet_ticks: duration_to_ticks(config.quiet_period()),
            quiesce_limit_ticks: duration_to_ticks(config.quiesce_limit()),
            quiesce_poll: config.quiesce_poll(),
            tx_poll: config.quiesce_poll(),
            heartbeat_interval: config.heartbeat_interval(),
            dma_tx: config.dma_tx,
        }
    }
}

/// The worker loop and the collaborators it owns for its lifetime.
pub(crate) struct Worker {
    state: Arc<WorkerState>,
    serial: Box<dyn SerialLine>,
    net: Arc<dyn NetworkStack>,
    sink: Box<dyn ByteSink>,
    heartbeat: Heartbeat,
    timing: Timing,
}

impl Worker {
    pub(crate) fn new(
        state: Arc<WorkerState>,
        config: &BridgeConfig,
        serial: Box<dyn SerialLine>,
        net: Arc<dyn NetworkStack>,
        sink: Box<dyn ByteSink>,
        heartbeat: Heartbeat,
    ) -> Self {
        Self {
            state,
            serial,
            net,
            sink,
            heartbeat,
            timing: Timing::from_config(config),
        }
    }

    /// Start the loop on a named thread.
    pub(crate) fn spawn(self, name: String) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    fn run(mut self) {
        if let Some(fd) = self.state.descriptor() {
            info!("bridge worker started on {fd}");
        }
        loop {
            self.state.set_phase(WorkerPhase::WaitingSignal);
            let signalled = self.state.action.take_timeout(self.timing.heartbeat_interval);
            let Some(fd) = self.state.descriptor() else {
                break;
            };
            if signalled {
                if self.state.rx_pending.load(Ordering::Acquire) {
                    self.service_rx(fd);
                }
                if self.state.tx_pending.load(Ordering::Acquire) {
                    self.service_tx();
                }
            }
            if self.state.descriptor().is_none() {
                break;
            }
            self.state.set_phase(WorkerPhase::Idle);
            self.heartbeat.beat();
        }
        self.state.set_phase(WorkerPhase::ShuttingDown);
        debug!("bridge worker observed close");
        self.state.set_phase(WorkerPhase::Exited);
        self.state.exited.give();
    }

    /// Wait until no byte has landed for the quiet period, bounded by the
    /// quiescence cap. Returns false when the bridge closed meanwhile.
    fn quiesce(&self) -> bool {
        self.state.set_phase(WorkerPhase::QuiesceWait);
        let clock = &self.state.clock;
        let started = clock.now_ticks();
        loop {
            let now = clock.now_ticks();
            if now.saturating_sub(self.state.ring.last_update_tick()) >= self.timing.quiet_ticks {
                return true;
            }
            if now.saturating_sub(started) >= self.timing.quiesce_limit_ticks {
                debug!("receive line still busy at quiescence cap, draining");
                return true;
            }
            if self.state.descriptor().is_none() {
                return false;
            }
            clock.sleep(self.timing.quiesce_poll);
        }
    }

    fn service_rx(&mut self, fd: Descriptor) {
        if !self.quiesce() {
            return;
        }
        self.state.set_phase(WorkerPhase::Draining);
        self.net.notify_readable(fd);
        let mut chunk = [0u8; RX_CHUNK];
        loop {
            loop {
                let len = self.state.ring.drain(&mut chunk);
                if len == 0 {
                    break;
                }
                self.forward(fd, &chunk[..len]);
            }
            self.state.rx_pending.store(false, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            // Bytes that landed between the last drain and the flag clear did
            // not raise a new wakeup.
            if self.state.ring.available() == 0 {
                break;
            }
        }
        self.net.clear_readable(fd);
        self.state.telemetry.record_drain_cycle();
    }

    fn forward(&mut self, fd: Descriptor, chunk: &[u8]) {
        trace!("RX: {}", hex::encode(chunk));
        match self.sink.deliver(fd, chunk) {
            Ok(accepted) => self.state.telemetry.record_forwarded(accepted),
            Err(err) => {
                warn!("{fd}: dropping {} received bytes: {err}", chunk.len());
                self.state.telemetry.record_send_error();
            }
        }
    }

    fn service_tx(&mut self) {
        self.state.set_phase(WorkerPhase::Transmitting);
        let payload = core::mem::take(&mut *self.state.tx_slot.lock());
        self.state.tx_pending.store(false, Ordering::Release);
        trace!("TX: {}", hex::encode(payload.as_slice()));

        if self.timing.dma_tx {
            let (completion, acceptance) = TxCompletion::new(
                Arc::clone(&self.state.tx_gate),
                Arc::clone(&self.state.telemetry),
                payload.len(),
            );
            match self.serial.write_block_async(&payload, completion) {
                Ok(()) => {
                    acceptance.accepted();
                    return;
                }
                Err(SerialError::Unsupported) => {
                    debug!("serial driver has no block transfer, writing bytes");
                }
                Err(err) => {
                    warn!("block transfer of {} bytes refused: {err}", payload.len());
                    self.state.telemetry.record_tx_error();
                    self.state.tx_gate.give();
                    return;
                }
            }
        }

        let written = self.write_bytes(&payload);
        self.state.telemetry.record_transmitted(written);
        self.state.tx_gate.give();
    }

    /// Blocking byte-by-byte transmit. Stops early on a driver fault or close.
    fn write_bytes(&mut self, payload: &[u8]) -> usize {
        for (written, &byte) in payload.iter().enumerate() {
            loop {
                match self.serial.write_byte(byte) {
                    Ok(()) => break,
                    Err(NbError::WouldBlock) => {
                        if self.state.descriptor().is_none() {
                            return written;
                        }
                        self.state.clock.sleep(self.timing.tx_poll);
                    }
                    Err(NbError::Other(err)) => {
                        warn!("serial write failed after {written} bytes: {err}");
                        self.state.telemetry.record_tx_error();
                        return written;
                    }
                }
            }
        }
        payload.len()
    }
}
