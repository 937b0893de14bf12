// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Network stack collaborator interface used by the bridge.
// Author: Lukas Bower

//! Socket-layer primitives consumed by the bridge.
//!
//! The bridge allocates one descriptor at open, raises readiness while it
//! forwards a drained burst and pushes bytes through [`NetworkStack::send`].
//! Connection establishment and wire framing belong to the implementation.

use core::fmt;
use std::io;

use thiserror::Error;

pub mod memory;
pub mod tcp;

/// Descriptor handed out by a [`NetworkStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Descriptor(i32);

impl Descriptor {
    /// Sentinel stored in worker state once the bridge is closed.
    pub const CLOSED: i32 = -1;

    /// Wrap a raw descriptor. Negative values are reserved for the sentinel.
    #[must_use]
    pub fn new(raw: i32) -> Option<Self> {
        (raw >= 0).then_some(Self(raw))
    }

    /// Raw descriptor value.
    #[must_use]
    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

/// Errors returned by network stack implementations.
#[derive(Debug, Error)]
pub enum NetError {
    /// No descriptor is available.
    #[error("descriptor table exhausted")]
    Exhausted,
    /// The descriptor is not open.
    #[error("unknown descriptor {0}")]
    UnknownDescriptor(Descriptor),
    /// The peer is gone.
    #[error("peer disconnected")]
    Disconnected,
    /// Underlying socket failure.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// Socket layer used by the bridge worker and handle.
pub trait NetworkStack: Send + Sync {
    /// Reserve a descriptor for a new bridge.
    fn allocate_descriptor(&self) -> Result<Descriptor, NetError>;

    /// Release a descriptor.
    fn close(&self, fd: Descriptor) -> Result<(), NetError>;

    /// Mark the descriptor readable in the select-style readiness set.
    fn notify_readable(&self, fd: Descriptor);

    /// Clear the readable mark.
    fn clear_readable(&self, fd: Descriptor);

    /// Send bytes, returning how many were accepted.
    fn send(&self, fd: Descriptor, data: &[u8]) -> Result<usize, NetError>;
}
