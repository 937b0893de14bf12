// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Crate root for the interrupt-fed serial-to-network bridge.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Serial-to-network bridge with an interrupt-fed receive ring, a bridge
//! worker task and a heartbeat supervisor.
//!
//! The receive path runs from the UART interrupt through
//! [`handoff::InterruptHandoff`] into the lock-free [`ring::RingBuffer`], wakes
//! the [`worker`] through a binary semaphore, and is forwarded to a
//! [`sink::ByteSink`] once the burst has settled. The transmit path goes the
//! other way through a single-slot gate. [`supervisor::Supervisor`] restarts
//! any worker that stops beating.
//!
//! Hardware and network stacks are collaborators behind the traits in
//! [`serial`] and [`network`]; host-mode implementations live in
//! [`serial::loopback`], [`network::memory`] and [`network::tcp`].

pub mod bridge;
pub mod clock;
pub mod config;
pub mod error;
pub mod handoff;
pub mod network;
pub mod ring;
pub mod serial;
pub mod sink;
pub mod supervisor;
pub mod sync;
pub mod telemetry;
pub mod worker;

pub use bridge::Bridge;
pub use clock::{Clock, SystemClock};
pub use config::{BridgeConfig, Parity, StopBits, SupervisorConfig, UartConfig, WordLength};
pub use error::{BridgeError, ConfigError};
pub use handoff::InterruptHandoff;
pub use network::{Descriptor, NetError, NetworkStack};
pub use ring::{RingBuffer, RingCursors, RingError};
pub use serial::{SerialError, SerialLine, SerialRx, TxCompletion};
pub use sink::{ByteSink, FrameParser, FrameSink, NetworkSink};
pub use supervisor::{BridgeService, BridgeSlot, Service, ServiceHealth, Supervisor};
pub use sync::{BinarySemaphore, Heartbeat};
pub use telemetry::BridgeTelemetry;
pub use worker::WorkerPhase;
