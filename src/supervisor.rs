// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Heartbeat supervisor that restarts stalled bridge workers.
// Author: Lukas Bower

//! Liveness supervision.
//!
//! Every watched [`Service`] is started with a fresh [`Heartbeat`]. Once per
//! period the supervisor waits, service by service in registration order, for
//! one beat within that service's timeout. A miss stops the service, discards
//! its state and starts a new instance with a new heartbeat.
//!
//! Restarts are unconditional: there is no backoff and no restart limit, so a
//! persistent fault restarts the service on every period. The restart and
//! consecutive-miss counters make such flapping visible.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use portable_atomic::{AtomicBool, AtomicU64, Ordering};

use crate::bridge::Bridge;
use crate::clock::Clock;
use crate::config::{BridgeConfig, SupervisorConfig};
use crate::error::BridgeError;
use crate::handoff::InterruptHandoff;
use crate::network::NetworkStack;
use crate::serial::SerialLine;
use crate::sink::ByteSink;
use crate::sync::Heartbeat;

const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

/// Long-running task the supervisor can stop and restart.
pub trait Service: Send {
    /// Name used in logs and restart accounting.
    fn name(&self) -> &str;

    /// Start a fresh instance that beats `heartbeat` at least once per period.
    fn start(&mut self, heartbeat: Heartbeat) -> Result<(), BridgeError>;

    /// Stop the running instance and release everything it owns.
    fn stop(&mut self);
}

struct Watch {
    service: Box<dyn Service>,
    timeout: Duration,
    heartbeat: Heartbeat,
    restarts: u64,
    consecutive_misses: u32,
}

/// Restart counters for one watched service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHealth {
    /// Restarts performed since the service was registered.
    pub restarts: u64,
    /// Misses since the last observed beat.
    pub consecutive_misses: u32,
}

/// Heartbeat supervisor.
pub struct Supervisor {
    config: SupervisorConfig,
    watches: Vec<Watch>,
}

impl Supervisor {
    /// Create a supervisor with no watched services.
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            watches: Vec::new(),
        }
    }

    /// Start `service` and monitor it with `timeout`, or the configured
    /// default heartbeat timeout when `None`.
    ///
    /// A service that fails its first start is not registered.
    pub fn watch(
        &mut self,
        mut service: Box<dyn Service>,
        timeout: Option<Duration>,
    ) -> Result<(), BridgeError> {
        let heartbeat = Heartbeat::new();
        if let Err(err) = service.start(heartbeat.clone()) {
            error!("failed to start {}: {err}", service.name());
            return Err(err);
        }
        let timeout = timeout.unwrap_or_else(|| self.config.heartbeat_timeout());
        info!("supervising {} with {:?} heartbeat timeout", service.name(), timeout);
        self.watches.push(Watch {
            service,
            timeout,
            heartbeat,
            restarts: 0,
            consecutive_misses: 0,
        });
        Ok(())
    }

    /// Run one monitoring pass. Returns the number of services restarted.
    pub fn check_once(&mut self) -> usize {
        let mut restarted = 0;
        for watch in &mut self.watches {
            if watch.heartbeat.wait(watch.timeout) {
                watch.consecutive_misses = 0;
                continue;
            }
            watch.consecutive_misses = watch.consecutive_misses.saturating_add(1);
            watch.restarts += 1;
            warn!(
                "{} missed its heartbeat for {:?}, restarting (restart {}, {} consecutive misses)",
                watch.service.name(),
                watch.timeout,
                watch.restarts,
                watch.consecutive_misses
            );
            watch.service.stop();
            watch.heartbeat = Heartbeat::new();
            if let Err(err) = watch.service.start(watch.heartbeat.clone()) {
                error!("failed to restart {}: {err}", watch.service.name());
            }
            restarted += 1;
        }
        restarted
    }

    /// Monitor until `shutdown` is set, then stop every service.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        let period = self.config.period();
        while !shutdown.load(Ordering::Acquire) {
            let deadline = Instant::now() + period;
            while !shutdown.load(Ordering::Acquire) {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                thread::sleep(remaining.min(SHUTDOWN_POLL));
            }
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            self.check_once();
        }
        self.stop_all();
    }

    /// Restart counters for the service named `name`.
    #[must_use]
    pub fn health(&self, name: &str) -> Option<ServiceHealth> {
        self.watches
            .iter()
            .find(|watch| watch.service.name() == name)
            .map(|watch| ServiceHealth {
                restarts: watch.restarts,
                consecutive_misses: watch.consecutive_misses,
            })
    }

    /// Restarts performed for the service named `name`.
    #[must_use]
    pub fn restarts(&self, name: &str) -> Option<u64> {
        self.health(name).map(|health| health.restarts)
    }

    /// Stop every watched service, in registration order.
    pub fn stop_all(&mut self) {
        for watch in &mut self.watches {
            watch.service.stop();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Shared view of the bridge instance a [`BridgeService`] currently runs.
///
/// The supervisor owns the bridge; holders of a slot borrow it per call and
/// see the replacement after a restart.
#[derive(Clone, Default)]
pub struct BridgeSlot {
    current: Arc<Mutex<Option<Bridge>>>,
    generation: Arc<AtomicU64>,
}

impl BridgeSlot {
    /// Run `f` against the current bridge, if one is open.
    pub fn with<R>(&self, f: impl FnOnce(&Bridge) -> R) -> Option<R> {
        self.lock().as_ref().map(f)
    }

    /// Queue `data` on the current bridge.
    pub fn write(&self, data: &[u8]) -> Result<usize, BridgeError> {
        self.with(|bridge| bridge.write(data))
            .unwrap_or(Err(BridgeError::Closed))
    }

    /// Receive handoff of the current bridge.
    ///
    /// IRQ glue should cache it and fetch a new one when
    /// [`BridgeSlot::generation`] changes.
    #[must_use]
    pub fn handoff(&self) -> Option<InterruptHandoff> {
        self.with(Bridge::handoff)
    }

    /// Number of bridge instances opened through this slot.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn install(&self, bridge: Bridge) {
        *self.lock() = Some(bridge);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn take(&self) -> Option<Bridge> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Bridge>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds the per-instance collaborators for a fresh bridge.
pub type BridgeParts = Box<dyn FnMut() -> (Box<dyn SerialLine>, Box<dyn ByteSink>) + Send>;

/// [`Service`] running one bridge, reopened from scratch on every start.
pub struct BridgeService {
    name: String,
    config: BridgeConfig,
    net: Arc<dyn NetworkStack>,
    clock: Arc<dyn Clock>,
    parts: BridgeParts,
    slot: BridgeSlot,
}

impl BridgeService {
    /// Create a service; `parts` supplies a serial line and sink per instance.
    pub fn new(
        name: impl Into<String>,
        config: BridgeConfig,
        net: Arc<dyn NetworkStack>,
        clock: Arc<dyn Clock>,
        parts: BridgeParts,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            net,
            clock,
            parts,
            slot: BridgeSlot::default(),
        }
    }

    /// Slot tracking the running bridge.
    #[must_use]
    pub fn slot(&self) -> BridgeSlot {
        self.slot.clone()
    }
}

impl Service for BridgeService {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, heartbeat: Heartbeat) -> Result<(), BridgeError> {
        let (serial, sink) = (self.parts)();
        let bridge = Bridge::open(
            self.config.clone(),
            serial,
            Arc::clone(&self.net),
            sink,
            heartbeat,
            Arc::clone(&self.clock),
        )?;
        self.slot.install(bridge);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut bridge) = self.slot.take() {
            bridge.close();
        }
    }
}
