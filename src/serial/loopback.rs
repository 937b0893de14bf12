// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: In-memory serial line used by host-mode runs and tests.
// Author: Lukas Bower

//! Loopback serial driver.
//!
//! Clones share one device, so the IRQ glue can hold a receive handle while the
//! bridge worker owns the transmit handle and a test inspects both.

use std::collections::VecDeque;
use std::sync::Arc;

use embedded_io::ErrorType;
use nb::Error as NbError;
use spin::Mutex;

use super::{SerialError, SerialLine, SerialRx, TxCompletion};
use crate::config::UartConfig;

#[derive(Debug, Default)]
struct LoopbackState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    config: Option<UartConfig>,
    reject_config: bool,
    tx_stalled: bool,
    dma: bool,
    defer_dma: bool,
    pending_dma: Option<TxCompletion>,
    tx_writes: usize,
}

/// In-memory serial stub shared between clones.
#[derive(Debug, Clone, Default)]
pub struct LoopbackSerial {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackSerial {
    /// Create a new loopback serial driver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a driver that accepts asynchronous block transfers.
    ///
    /// When `defer` is set the completion is held until
    /// [`LoopbackSerial::complete_dma`] runs, emulating a slow transfer.
    #[must_use]
    pub fn with_dma(defer: bool) -> Self {
        let serial = Self::new();
        {
            let mut state = serial.state.lock();
            state.dma = true;
            state.defer_dma = defer;
        }
        serial
    }

    /// Inject bytes that should be observed on the next receive interrupt.
    pub fn push_rx(&self, data: &[u8]) {
        self.state.lock().rx.extend(data.iter().copied());
    }

    /// Drain bytes that have been emitted on the transmit side.
    pub fn drain_tx(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().tx)
    }

    /// Bytes emitted so far, without draining them.
    #[must_use]
    pub fn transmitted(&self) -> Vec<u8> {
        self.state.lock().tx.clone()
    }

    /// Number of accepted transmit operations (bytes or blocks).
    #[must_use]
    pub fn tx_writes(&self) -> usize {
        self.state.lock().tx_writes
    }

    /// Line settings applied by the last successful `configure`.
    #[must_use]
    pub fn config(&self) -> Option<UartConfig> {
        self.state.lock().config
    }

    /// Make the next `configure` calls fail.
    pub fn reject_config(&self, reject: bool) {
        self.state.lock().reject_config = reject;
    }

    /// While stalled, the transmit FIFO reports full on every write.
    pub fn set_tx_stalled(&self, stalled: bool) {
        self.state.lock().tx_stalled = stalled;
    }

    /// Finish a deferred block transfer. Returns false when none is pending.
    pub fn complete_dma(&self) -> bool {
        let pending = self.state.lock().pending_dma.take();
        match pending {
            Some(completion) => {
                completion.complete();
                true
            }
            None => false,
        }
    }

    /// Discard a deferred block transfer without completing it, as a device
    /// reset would. Returns false when none is pending.
    pub fn abandon_dma(&self) -> bool {
        let pending = self.state.lock().pending_dma.take();
        pending.is_some()
    }
}

impl ErrorType for LoopbackSerial {
    type Error = SerialError;
}

impl SerialRx for LoopbackSerial {
    fn read_byte(&mut self) -> nb::Result<u8, Self::Error> {
        self.state.lock().rx.pop_front().ok_or(NbError::WouldBlock)
    }
}

impl SerialLine for LoopbackSerial {
    fn configure(&mut self, config: &UartConfig) -> Result<(), SerialError> {
        let mut state = self.state.lock();
        if state.reject_config {
            return Err(SerialError::UnsupportedConfig);
        }
        state.config = Some(*config);
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> nb::Result<(), SerialError> {
        let mut state = self.state.lock();
        if state.tx_stalled {
            return Err(NbError::WouldBlock);
        }
        state.tx.push(byte);
        state.tx_writes += 1;
        Ok(())
    }

    fn write_block_async(
        &mut self,
        data: &[u8],
        completion: TxCompletion,
    ) -> Result<(), SerialError> {
        let mut state = self.state.lock();
        if !state.dma {
            return Err(SerialError::Unsupported);
        }
        if state.pending_dma.is_some() {
            return Err(SerialError::TransferInFlight);
        }
        state.tx.extend_from_slice(data);
        state.tx_writes += 1;
        if state.defer_dma {
            state.pending_dma = Some(completion);
        } else {
            drop(state);
            completion.complete();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Parity, StopBits, WordLength};

    fn uart() -> UartConfig {
        UartConfig {
            baud_rate: 115_200,
            word_length: WordLength::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: false,
        }
    }

    #[test]
    fn clones_share_the_device() {
        let serial = LoopbackSerial::new();
        let mut irq_side = serial.clone();
        serial.push_rx(b"ok");
        assert_eq!(irq_side.read_byte(), Ok(b'o'));
        assert_eq!(irq_side.read_byte(), Ok(b'k'));
        assert_eq!(irq_side.read_byte(), Err(NbError::WouldBlock));
    }

    #[test]
    fn configure_records_settings_or_rejects() {
        let mut serial = LoopbackSerial::new();
        serial.configure(&uart()).unwrap();
        assert_eq!(serial.config().unwrap().baud_rate, 115_200);
        serial.reject_config(true);
        assert_eq!(
            serial.configure(&uart()),
            Err(SerialError::UnsupportedConfig)
        );
    }

    #[test]
    fn stalled_transmitter_would_block() {
        let mut serial = LoopbackSerial::new();
        serial.set_tx_stalled(true);
        assert_eq!(serial.write_byte(1), Err(NbError::WouldBlock));
        serial.set_tx_stalled(false);
        serial.write_byte(1).unwrap();
        assert_eq!(serial.drain_tx(), vec![1]);
    }
}
