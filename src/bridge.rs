// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Owning handle for one open serial-to-network bridge.
// Author: Lukas Bower

//! Bridge handle.
//!
//! [`Bridge::open`] validates the configuration, configures the serial line,
//! allocates the network descriptor, builds fresh worker state and spawns the
//! worker thread. The handle is the only way to transmit or close; the
//! receive side is reached through [`Bridge::handoff`], which IRQ glue keeps.
//!
//! Receive data leaves the bridge only through the sink, so the ring keeps a
//! single consumer.

use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, error, info, warn};
use portable_atomic::Ordering;

use crate::clock::Clock;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, ConfigError};
use crate::handoff::InterruptHandoff;
use crate::network::{Descriptor, NetworkStack};
use crate::ring::RingCursors;
use crate::serial::SerialLine;
use crate::sink::ByteSink;
use crate::sync::Heartbeat;
use crate::telemetry::BridgeTelemetry;
use crate::worker::{Worker, WorkerPhase, WorkerState, TX_SLOT_CAPACITY};

/// Handle to an open bridge and its worker thread.
pub struct Bridge {
    state: Arc<WorkerState>,
    net: Arc<dyn NetworkStack>,
    worker: Option<JoinHandle<()>>,
    config: BridgeConfig,
}

impl Bridge {
    /// Open a bridge and start its worker.
    ///
    /// Fails without spawning anything when the configuration is invalid, the
    /// serial line rejects it or no descriptor is available.
    pub fn open(
        config: BridgeConfig,
        mut serial: Box<dyn SerialLine>,
        net: Arc<dyn NetworkStack>,
        sink: Box<dyn ByteSink>,
        heartbeat: Heartbeat,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        serial.configure(&config.uart)?;
        let fd = net.allocate_descriptor().map_err(BridgeError::Resource)?;

        let state = match WorkerState::new(config.rx_capacity, fd, clock) {
            Ok(state) => Arc::new(state),
            Err(err) => {
                debug!("ring allocation failed for {fd}: {err}");
                release_descriptor(net.as_ref(), fd);
                return Err(ConfigError::Invalid("rx_capacity out of range").into());
            }
        };

        let worker = Worker::new(
            Arc::clone(&state),
            &config,
            serial,
            Arc::clone(&net),
            sink,
            heartbeat,
        );
        let handle = match worker.spawn(format!("uart-bridge-{}", fd.raw())) {
            Ok(handle) => handle,
            Err(source) => {
                error!("failed to spawn bridge worker for {fd}: {source}");
                state.mark_closed();
                release_descriptor(net.as_ref(), fd);
                return Err(BridgeError::Spawn {
                    task: "bridge worker",
                    source,
                });
            }
        };

        info!(
            "bridge {fd} open at {} baud, {}-byte receive ring",
            config.uart.baud_rate, config.rx_capacity
        );
        Ok(Self {
            state,
            net,
            worker: Some(handle),
            config,
        })
    }

    /// Queue `data` for transmission on the serial line.
    ///
    /// Waits for the transmit gate in bounded steps and reports
    /// [`BridgeError::Busy`] when a previous payload is still in flight. On
    /// success the payload is staged and the worker is woken; the gate stays
    /// held until the transmission completes.
    pub fn write(&self, data: &[u8]) -> Result<usize, BridgeError> {
        if data.is_empty() {
            return Err(BridgeError::InvalidInput("empty write"));
        }
        if data.len() > TX_SLOT_CAPACITY {
            return Err(BridgeError::TooLarge {
                requested: data.len(),
                capacity: TX_SLOT_CAPACITY,
            });
        }
        if self.state.descriptor().is_none() {
            return Err(BridgeError::Closed);
        }

        let attempts = self.config.tx_gate_retries;
        let retry = self.config.tx_retry();
        let acquired = (0..attempts).any(|_| self.state.tx_gate.take_timeout(retry));
        if !acquired {
            self.state.telemetry.record_busy();
            debug!("transmit gate busy after {attempts} attempts");
            return Err(BridgeError::Busy { attempts });
        }
        if self.state.descriptor().is_none() {
            self.state.tx_gate.give();
            return Err(BridgeError::Closed);
        }

        {
            let mut slot = self.state.tx_slot.lock();
            slot.clear();
            if slot.extend_from_slice(data).is_err() {
                drop(slot);
                self.state.tx_gate.give();
                return Err(BridgeError::TooLarge {
                    requested: data.len(),
                    capacity: TX_SLOT_CAPACITY,
                });
            }
        }
        self.state.tx_pending.store(true, Ordering::Release);
        self.state.action.give();
        Ok(data.len())
    }

    /// Close the descriptor and stop the worker.
    ///
    /// Stores the close sentinel, wakes the worker and waits up to the exit
    /// timeout for its acknowledgement before joining it. A worker that never
    /// acknowledges is detached; it only holds this instance's state. Calling
    /// `close` again is a no-op.
    pub fn close(&mut self) {
        let Some(fd) = self.state.mark_closed() else {
            return;
        };
        release_descriptor(self.net.as_ref(), fd);
        self.state.action.give();

        if let Some(handle) = self.worker.take() {
            if self.state.exited.take_timeout(self.config.exit_timeout()) {
                if handle.join().is_err() {
                    warn!("bridge worker for {fd} panicked during shutdown");
                }
            } else {
                warn!(
                    "bridge worker for {fd} did not acknowledge exit within {:?}, detaching",
                    self.config.exit_timeout()
                );
            }
        }
        info!("bridge {fd} closed");
    }

    /// Handle for the UART receive interrupt.
    #[must_use]
    pub fn handoff(&self) -> InterruptHandoff {
        InterruptHandoff::new(Arc::clone(&self.state))
    }

    /// Open descriptor, or `None` after close.
    #[must_use]
    pub fn descriptor(&self) -> Option<Descriptor> {
        self.state.descriptor()
    }

    /// True once [`Bridge::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.descriptor().is_none()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn telemetry(&self) -> BridgeTelemetry {
        self.state
            .telemetry
            .snapshot(self.state.ring.received(), self.state.ring.overwritten())
    }

    /// Receive ring cursor snapshot.
    #[must_use]
    pub fn rx_cursors(&self) -> RingCursors {
        self.state.ring.cursors()
    }

    /// Current worker phase.
    #[must_use]
    pub fn phase(&self) -> WorkerPhase {
        self.state.phase()
    }

    /// Configuration the bridge was opened with.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.close();
    }
}

impl core::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bridge")
            .field("descriptor", &self.descriptor())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

fn release_descriptor(net: &dyn NetworkStack, fd: Descriptor) {
    if let Err(err) = net.close(fd) {
        warn!("failed to release {fd}: {err}");
    }
}
