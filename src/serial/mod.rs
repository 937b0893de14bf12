// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Serial line collaborator traits consumed by the bridge.
// Author: Lukas Bower

//! Character-level serial primitives.
//!
//! The bridge never talks to UART registers directly. Receive happens in
//! interrupt context through [`SerialRx`], which the IRQ glue hands to
//! [`crate::InterruptHandoff::on_rx_interrupt`]. Configuration and transmit go
//! through [`SerialLine`], which the bridge worker owns.
//!
//! Both traits follow the `nb` convention: `WouldBlock` means the FIFO is
//! empty (receive) or full (transmit) and the caller should try again later.

use core::fmt;
use std::sync::Arc;

use embedded_io::{Error as EmbeddedError, ErrorKind, ErrorType};
use log::warn;
use portable_atomic::{AtomicU8, Ordering};

use crate::config::UartConfig;
use crate::sync::BinarySemaphore;
use crate::telemetry::TelemetryCounters;

pub mod loopback;

/// Error type surfaced by serial drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialError {
    /// Serial device reported an unrecoverable failure.
    DeviceFault,
    /// Device cannot run with the requested line settings.
    UnsupportedConfig,
    /// Driver does not implement the requested operation.
    Unsupported,
    /// A block transfer is already in flight.
    TransferInFlight,
}

impl fmt::Display for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceFault => write!(f, "serial device fault"),
            Self::UnsupportedConfig => write!(f, "serial line settings not supported"),
            Self::Unsupported => write!(f, "operation not supported by serial driver"),
            Self::TransferInFlight => write!(f, "serial block transfer already in flight"),
        }
    }
}

impl core::error::Error for SerialError {}

impl EmbeddedError for SerialError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedConfig => ErrorKind::InvalidInput,
            Self::Unsupported => ErrorKind::Unsupported,
            Self::DeviceFault | Self::TransferInFlight => ErrorKind::Other,
        }
    }
}

/// Receive side of the UART, polled from interrupt context.
pub trait SerialRx: ErrorType {
    /// Attempt to read a single byte from the receive FIFO.
    fn read_byte(&mut self) -> nb::Result<u8, Self::Error>;
}

/// Configuration and transmit side of the UART, owned by the bridge worker.
pub trait SerialLine: Send {
    /// Apply line settings. Called once when the bridge opens.
    fn configure(&mut self, config: &UartConfig) -> Result<(), SerialError>;

    /// Attempt to write a single byte to the transmit FIFO.
    fn write_byte(&mut self, byte: u8) -> nb::Result<(), SerialError>;

    /// Start an asynchronous block transfer.
    ///
    /// On success the driver must eventually call [`TxCompletion::complete`],
    /// typically from its transmit-complete interrupt. On error the completion
    /// is dropped without being signalled and the caller releases the gate.
    /// Dropping an accepted completion releases the gate as a failed transfer.
    fn write_block_async(
        &mut self,
        data: &[u8],
        completion: TxCompletion,
    ) -> Result<(), SerialError> {
        let _ = (data, completion);
        Err(SerialError::Unsupported)
    }
}

impl<T: SerialLine + ?Sized> SerialLine for Box<T> {
    fn configure(&mut self, config: &UartConfig) -> Result<(), SerialError> {
        (**self).configure(config)
    }

    fn write_byte(&mut self, byte: u8) -> nb::Result<(), SerialError> {
        (**self).write_byte(byte)
    }

    fn write_block_async(
        &mut self,
        data: &[u8],
        completion: TxCompletion,
    ) -> Result<(), SerialError> {
        (**self).write_block_async(data, completion)
    }
}

const STAGE_PENDING: u8 = 0;
const STAGE_ACCEPTED: u8 = 1;
const STAGE_COMPLETED: u8 = 2;
const STAGE_DROPPED: u8 = 3;

/// Completion token for an asynchronous block transfer.
///
/// Completing releases the transmit gate so the next writer may fill the slot.
/// A token dropped without completing after the driver accepted the transfer
/// releases the gate too and counts a transmit error.
#[derive(Debug)]
#[must_use = "a TxCompletion must be completed once the transfer finishes"]
pub struct TxCompletion {
    gate: Arc<BinarySemaphore>,
    telemetry: Arc<TelemetryCounters>,
    stage: Arc<AtomicU8>,
    len: usize,
    completed: bool,
}

impl TxCompletion {
    /// Create a token and the handle the worker uses once the driver has
    /// answered `write_block_async`.
    pub(crate) fn new(
        gate: Arc<BinarySemaphore>,
        telemetry: Arc<TelemetryCounters>,
        len: usize,
    ) -> (Self, TxAcceptance) {
        let stage = Arc::new(AtomicU8::new(STAGE_PENDING));
        let acceptance = TxAcceptance {
            gate: Arc::clone(&gate),
            telemetry: Arc::clone(&telemetry),
            stage: Arc::clone(&stage),
        };
        let completion = Self {
            gate,
            telemetry,
            stage,
            len,
            completed: false,
        };
        (completion, acceptance)
    }

    /// Number of bytes in the transfer this token completes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the transfer carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Signal that the transfer finished. Safe to call from interrupt context.
    pub fn complete(mut self) {
        self.completed = true;
        self.stage.store(STAGE_COMPLETED, Ordering::Release);
        self.telemetry.record_transmitted(self.len);
        self.gate.give_from_isr();
    }
}

impl Drop for TxCompletion {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if self.stage.swap(STAGE_DROPPED, Ordering::AcqRel) == STAGE_ACCEPTED {
            warn!("block transfer of {} bytes abandoned by the driver", self.len);
            self.telemetry.record_tx_error();
            self.gate.give_from_isr();
        }
    }
}

/// Worker-side half of a [`TxCompletion`].
///
/// Before acceptance the gate belongs to the worker, which releases it itself
/// when the driver refuses the transfer.
#[derive(Debug)]
pub(crate) struct TxAcceptance {
    gate: Arc<BinarySemaphore>,
    telemetry: Arc<TelemetryCounters>,
    stage: Arc<AtomicU8>,
}

impl TxAcceptance {
    /// Record that the driver accepted the transfer. A token the driver
    /// already dropped releases the gate here.
    pub(crate) fn accepted(self) {
        match self.stage.compare_exchange(
            STAGE_PENDING,
            STAGE_ACCEPTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) | Err(STAGE_COMPLETED) => {}
            Err(_) => {
                warn!("driver accepted a block transfer but dropped its completion");
                self.telemetry.record_tx_error();
                self.gate.give();
            }
        }
    }
}
