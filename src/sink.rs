// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Destinations for bytes drained from the receive ring.
// Author: Lukas Bower

//! Sinks receiving drained receive bursts.
//!
//! The worker hands every non-empty chunk to a [`ByteSink`]. [`NetworkSink`]
//! forwards chunks to the bridge descriptor; [`FrameSink`] splits chunks into
//! validated frames using an external [`FrameParser`] before forwarding.

use std::sync::Arc;

use log::debug;

use crate::network::{Descriptor, NetError, NetworkStack};

/// Consumer of drained receive data.
pub trait ByteSink: Send {
    /// Deliver one chunk. Returns the number of bytes accepted.
    fn deliver(&mut self, fd: Descriptor, chunk: &[u8]) -> Result<usize, NetError>;
}

impl<F> ByteSink for F
where
    F: FnMut(Descriptor, &[u8]) -> Result<usize, NetError> + Send,
{
    fn deliver(&mut self, fd: Descriptor, chunk: &[u8]) -> Result<usize, NetError> {
        self(fd, chunk)
    }
}

/// Sink that sends every chunk through the network stack.
pub struct NetworkSink {
    net: Arc<dyn NetworkStack>,
}

impl NetworkSink {
    /// Forward chunks through `net`.
    #[must_use]
    pub fn new(net: Arc<dyn NetworkStack>) -> Self {
        Self { net }
    }
}

impl ByteSink for NetworkSink {
    fn deliver(&mut self, fd: Descriptor, chunk: &[u8]) -> Result<usize, NetError> {
        let mut offset = 0;
        while offset < chunk.len() {
            let sent = self.net.send(fd, &chunk[offset..])?;
            if sent == 0 {
                return Err(NetError::Disconnected);
            }
            offset += sent;
        }
        Ok(offset)
    }
}

/// Recognises validated frames at the start of a byte range.
pub trait FrameParser: Send {
    /// Return the length of the complete frame at the start of `data`, or
    /// `None` when no valid frame starts there.
    fn parse(&mut self, data: &[u8]) -> Option<usize>;
}

/// Sink that forwards whole frames and discards what no frame covers.
pub struct FrameSink<P, S> {
    parser: P,
    inner: S,
    discarded: u64,
}

impl<P, S> FrameSink<P, S>
where
    P: FrameParser,
    S: ByteSink,
{
    /// Split chunks with `parser` and forward frames to `inner`.
    pub fn new(parser: P, inner: S) -> Self {
        Self {
            parser,
            inner,
            discarded: 0,
        }
    }

    /// Bytes dropped because no frame covered them.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl<P, S> ByteSink for FrameSink<P, S>
where
    P: FrameParser,
    S: ByteSink,
{
    fn deliver(&mut self, fd: Descriptor, chunk: &[u8]) -> Result<usize, NetError> {
        let mut offset = 0;
        let mut forwarded = 0;
        while offset < chunk.len() {
            let rest = &chunk[offset..];
            let Some(len) = self
                .parser
                .parse(rest)
                .filter(|len| (1..=rest.len()).contains(len))
            else {
                break;
            };
            forwarded += self.inner.deliver(fd, &rest[..len])?;
            offset += len;
        }
        let dropped = chunk.len() - offset;
        if dropped > 0 {
            debug!("{fd}: discarded {dropped} bytes outside any frame");
            self.discarded += dropped as u64;
        }
        Ok(forwarded)
    }
}
