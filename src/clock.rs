// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Monotonic tick source and bounded sleep used by the bridge tasks.
// Author: Lukas Bower

//! Timing primitive consumed by the interrupt handoff, worker and supervisor.
//!
//! One tick is one microsecond. Interrupt context only ever calls
//! [`Clock::now_ticks`], which must not block.

use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Return the current tick count in microseconds.
    fn now_ticks(&self) -> u64;

    /// Suspend the calling task for the supplied duration.
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock backed by [`Instant`], counting from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose tick zero is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ticks(&self) -> u64 {
        duration_to_ticks(self.origin.elapsed())
    }
}

/// Convert a duration into clock ticks, saturating at `u64::MAX`.
#[must_use]
pub fn duration_to_ticks(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
