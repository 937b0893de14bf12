// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: In-memory network stack for host-mode runs and tests.
// Author: Lukas Bower

//! Network stack that records everything sent per descriptor.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Descriptor, NetError, NetworkStack};

#[derive(Debug, Default)]
struct Endpoint {
    open: bool,
    sent: Vec<u8>,
    readable: bool,
    readable_events: u32,
}

#[derive(Debug, Default)]
struct MemoryState {
    next: i32,
    endpoints: BTreeMap<Descriptor, Endpoint>,
    limit: Option<usize>,
    send_chunk: Option<usize>,
    failing_sends: u32,
    closed: Vec<Descriptor>,
}

impl MemoryState {
    fn open_endpoint(&mut self, fd: Descriptor) -> Result<&mut Endpoint, NetError> {
        self.endpoints
            .get_mut(&fd)
            .filter(|endpoint| endpoint.open)
            .ok_or(NetError::UnknownDescriptor(fd))
    }

    fn open_count(&self) -> usize {
        self.endpoints.values().filter(|endpoint| endpoint.open).count()
    }
}

/// In-memory [`NetworkStack`].
///
/// Descriptors are never reused, and sent bytes stay inspectable after close.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    state: Mutex<MemoryState>,
}

impl MemoryNetwork {
    /// Create a stack with an unbounded descriptor table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stack that hands out at most `limit` concurrent descriptors.
    #[must_use]
    pub fn with_descriptor_limit(limit: usize) -> Self {
        let network = Self::new();
        network.lock().limit = Some(limit);
        network
    }

    /// Accept at most `chunk` bytes per `send` call.
    pub fn set_send_chunk(&self, chunk: Option<usize>) {
        self.lock().send_chunk = chunk;
    }

    /// Fail the next `count` sends with a disconnect.
    pub fn fail_next_sends(&self, count: u32) {
        self.lock().failing_sends = count;
    }

    /// Bytes sent on `fd` so far.
    #[must_use]
    pub fn sent(&self, fd: Descriptor) -> Vec<u8> {
        self.lock()
            .endpoints
            .get(&fd)
            .map(|endpoint| endpoint.sent.clone())
            .unwrap_or_default()
    }

    /// Whether `fd` is currently marked readable.
    #[must_use]
    pub fn is_readable(&self, fd: Descriptor) -> bool {
        self.lock()
            .endpoints
            .get(&fd)
            .is_some_and(|endpoint| endpoint.readable)
    }

    /// Number of readable notifications raised on `fd`.
    #[must_use]
    pub fn readable_events(&self, fd: Descriptor) -> u32 {
        self.lock()
            .endpoints
            .get(&fd)
            .map_or(0, |endpoint| endpoint.readable_events)
    }

    /// Descriptors currently open.
    #[must_use]
    pub fn open_descriptors(&self) -> Vec<Descriptor> {
        self.lock()
            .endpoints
            .iter()
            .filter(|(_, endpoint)| endpoint.open)
            .map(|(fd, _)| *fd)
            .collect()
    }

    /// Descriptors closed so far, in close order.
    #[must_use]
    pub fn closed_descriptors(&self) -> Vec<Descriptor> {
        self.lock().closed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NetworkStack for MemoryNetwork {
    fn allocate_descriptor(&self) -> Result<Descriptor, NetError> {
        let mut state = self.lock();
        let limit = state.limit;
        if limit.is_some_and(|limit| state.open_count() >= limit) {
            return Err(NetError::Exhausted);
        }
        let fd = Descriptor::new(state.next).ok_or(NetError::Exhausted)?;
        state.next = state.next.checked_add(1).ok_or(NetError::Exhausted)?;
        state.endpoints.insert(
            fd,
            Endpoint {
                open: true,
                ..Endpoint::default()
            },
        );
        Ok(fd)
    }

    fn close(&self, fd: Descriptor) -> Result<(), NetError> {
        let mut state = self.lock();
        let endpoint = state.open_endpoint(fd)?;
        endpoint.open = false;
        endpoint.readable = false;
        state.closed.push(fd);
        Ok(())
    }

    fn notify_readable(&self, fd: Descriptor) {
        if let Ok(endpoint) = self.lock().open_endpoint(fd) {
            endpoint.readable = true;
            endpoint.readable_events += 1;
        }
    }

    fn clear_readable(&self, fd: Descriptor) {
        if let Ok(endpoint) = self.lock().open_endpoint(fd) {
            endpoint.readable = false;
        }
    }

    fn send(&self, fd: Descriptor, data: &[u8]) -> Result<usize, NetError> {
        let mut state = self.lock();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(NetError::Disconnected);
        }
        let chunk = state.send_chunk.unwrap_or(data.len()).min(data.len());
        let endpoint = state.open_endpoint(fd)?;
        endpoint.sent.extend_from_slice(&data[..chunk]);
        Ok(chunk)
    }
}
