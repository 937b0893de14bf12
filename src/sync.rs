// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Binary semaphore and heartbeat signal shared between bridge tasks.
// Author: Lukas Bower

//! Counting-free signalling primitives.
//!
//! A [`BinarySemaphore`] holds at most one pending give; giving it again before
//! a take is a no-op. The same primitive carries the worker wakeup, the
//! transmit gate, the worker exit acknowledgement and the liveness
//! [`Heartbeat`].

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use portable_atomic::{AtomicBool, Ordering};

/// Longest a waiter sleeps before re-reading the flag. Bounds the delay of an
/// interrupt-context give whose wakeup was skipped.
const WAKE_SLICE: Duration = Duration::from_millis(5);

/// Semaphore whose count saturates at one.
///
/// The given flag is a lone atomic. The mutex only orders waiters against the
/// condition variable and is never required to give.
#[derive(Debug, Default)]
pub struct BinarySemaphore {
    given: AtomicBool,
    waiters: Mutex<()>,
    ready: Condvar,
}

impl BinarySemaphore {
    /// Create a semaphore, optionally already given.
    #[must_use]
    pub fn new(initial: bool) -> Self {
        Self {
            given: AtomicBool::new(initial),
            waiters: Mutex::new(()),
            ready: Condvar::new(),
        }
    }

    /// Make the semaphore available and wake one waiter.
    pub fn give(&self) {
        self.given.store(true, Ordering::SeqCst);
        let _waiters = self.lock();
        self.ready.notify_one();
    }

    /// Interrupt-context give.
    ///
    /// Stores the flag and never blocks. When a task holds the waiter lock
    /// the wakeup is skipped and the waiter observes the flag on its next
    /// slice.
    pub fn give_from_isr(&self) {
        self.given.store(true, Ordering::SeqCst);
        if !matches!(self.waiters.try_lock(), Err(TryLockError::WouldBlock)) {
            self.ready.notify_one();
        }
    }

    /// Block until the semaphore is given, then consume it.
    pub fn take(&self) {
        let mut waiters = self.lock();
        while !self.given.swap(false, Ordering::SeqCst) {
            waiters = self.wait_slice(waiters, WAKE_SLICE);
        }
    }

    /// Wait up to `timeout` for the semaphore. Returns true when consumed.
    pub fn take_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut waiters = self.lock();
        loop {
            if self.given.swap(false, Ordering::SeqCst) {
                return true;
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => WAKE_SLICE,
            };
            if remaining.is_zero() {
                return false;
            }
            waiters = self.wait_slice(waiters, remaining.min(WAKE_SLICE));
        }
    }

    /// Consume the semaphore if it is currently given.
    pub fn try_take(&self) -> bool {
        self.given.swap(false, Ordering::SeqCst)
    }

    fn wait_slice<'a>(&self, waiters: MutexGuard<'a, ()>, slice: Duration) -> MutexGuard<'a, ()> {
        let (waiters, _) = self
            .ready
            .wait_timeout(waiters, slice)
            .unwrap_or_else(PoisonError::into_inner);
        waiters
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Liveness signal a supervised task gives once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    signal: Arc<BinarySemaphore>,
}

impl Heartbeat {
    /// Create a heartbeat with no pending beat.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one iteration of the supervised loop.
    pub fn beat(&self) {
        self.signal.give();
    }

    /// Wait up to `timeout` for a beat. Returns false on a miss.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.signal.take_timeout(timeout)
    }
}
