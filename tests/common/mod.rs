// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Shared fixtures for bridge integration tests.
// Author: Lukas Bower
#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use uart_bridge::network::memory::MemoryNetwork;
use uart_bridge::serial::loopback::LoopbackSerial;
use uart_bridge::{
    Bridge, BridgeConfig, BridgeError, Heartbeat, NetworkSink, Parity, StopBits, SystemClock,
    UartConfig, WordLength,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn uart() -> UartConfig {
    UartConfig {
        baud_rate: 115_200,
        word_length: WordLength::Eight,
        parity: Parity::None,
        stop_bits: StopBits::One,
        flow_control: false,
    }
}

/// Tuning scaled down so tests finish quickly.
pub fn fast_config(rx_capacity: usize) -> BridgeConfig {
    let mut config = BridgeConfig::new(uart());
    config.rx_capacity = rx_capacity;
    config.quiet_period_ms = 20;
    config.quiesce_poll_ms = 2;
    config.quiesce_limit_ms = 500;
    config.tx_gate_retries = 3;
    config.tx_retry_ms = 10;
    config.heartbeat_interval_ms = 20;
    config.exit_timeout_ms = 1_000;
    config
}

#[derive(Debug)]
pub struct Rig {
    pub bridge: Bridge,
    pub serial: LoopbackSerial,
    pub net: Arc<MemoryNetwork>,
}

impl Rig {
    pub fn open(config: BridgeConfig) -> Result<Self, BridgeError> {
        Self::open_with(config, LoopbackSerial::new(), Arc::new(MemoryNetwork::new()))
    }

    pub fn open_with(
        config: BridgeConfig,
        serial: LoopbackSerial,
        net: Arc<MemoryNetwork>,
    ) -> Result<Self, BridgeError> {
        init_logging();
        let bridge = Bridge::open(
            config,
            Box::new(serial.clone()),
            net.clone(),
            Box::new(NetworkSink::new(net.clone())),
            Heartbeat::new(),
            Arc::new(SystemClock::new()),
        )?;
        Ok(Self {
            bridge,
            serial,
            net,
        })
    }

    /// Simulate one receive interrupt delivering `data`.
    pub fn receive(&self, data: &[u8]) {
        self.serial.push_rx(data);
        let mut irq_side = self.serial.clone();
        self.bridge.handoff().on_rx_interrupt(&mut irq_side);
    }

    pub fn forwarded(&self) -> Vec<u8> {
        self.bridge
            .descriptor()
            .map(|fd| self.net.sent(fd))
            .unwrap_or_default()
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
