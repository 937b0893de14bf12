// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Receive path from simulated UART interrupts to the network sink.
// Author: Lukas Bower
#![cfg(not(loom))]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, wait_until, Rig};
use uart_bridge::network::memory::MemoryNetwork;
use uart_bridge::serial::loopback::LoopbackSerial;
use uart_bridge::{BridgeError, ConfigError, NetError, WorkerPhase};

const SETTLE: Duration = Duration::from_secs(3);

#[test]
fn burst_is_forwarded_in_order_after_quiescence() {
    let rig = Rig::open(fast_config(64)).unwrap();
    let fd = rig.bridge.descriptor().unwrap();

    rig.receive(b"hello ");
    rig.receive(b"world");
    assert!(wait_until(SETTLE, || rig.forwarded() == b"hello world"));

    assert!(!rig.net.is_readable(fd), "readiness cleared after the drain");
    assert!(rig.net.readable_events(fd) >= 1);
    let telemetry = rig.bridge.telemetry();
    assert_eq!(telemetry.received, 11);
    assert_eq!(telemetry.forwarded, 11);
    assert_eq!(telemetry.overwritten, 0);
    assert!(telemetry.drain_cycles >= 1);
}

#[test]
fn overflow_before_drain_forwards_most_recent_bytes() {
    let rig = Rig::open(fast_config(16)).unwrap();
    let burst: Vec<u8> = (1..=20).collect();
    rig.receive(&burst);

    let expected: Vec<u8> = (5..=20).collect();
    assert!(wait_until(SETTLE, || rig.forwarded() == expected));
    let telemetry = rig.bridge.telemetry();
    assert_eq!(telemetry.received, 20);
    assert_eq!(telemetry.overwritten, 4);
    assert!(wait_until(SETTLE, || !rig.bridge.rx_cursors().overlap));

    rig.receive(&[0xAA, 0xBB]);
    let mut expected = expected;
    expected.extend_from_slice(&[0xAA, 0xBB]);
    assert!(wait_until(SETTLE, || rig.forwarded() == expected));
}

#[test]
fn send_failures_are_counted_and_the_worker_keeps_running() {
    let rig = Rig::open(fast_config(64)).unwrap();
    rig.net.fail_next_sends(1);

    rig.receive(b"lost");
    assert!(wait_until(SETTLE, || rig.bridge.telemetry().send_errors == 1));

    rig.receive(b"kept");
    assert!(wait_until(SETTLE, || rig.forwarded() == b"kept"));
}

#[test]
fn open_failures_leave_nothing_running() {
    let net = Arc::new(MemoryNetwork::with_descriptor_limit(0));
    let err = Rig::open_with(fast_config(64), LoopbackSerial::new(), net.clone()).unwrap_err();
    assert!(matches!(err, BridgeError::Resource(NetError::Exhausted)));

    let mut config = fast_config(64);
    config.uart.baud_rate = 0;
    let net = Arc::new(MemoryNetwork::new());
    let err = Rig::open_with(config, LoopbackSerial::new(), net.clone()).unwrap_err();
    assert!(matches!(err, BridgeError::Config(ConfigError::Invalid(_))));
    assert!(net.open_descriptors().is_empty());

    let serial = LoopbackSerial::new();
    serial.reject_config(true);
    let err = Rig::open_with(fast_config(64), serial, net.clone()).unwrap_err();
    assert!(matches!(err, BridgeError::Serial(_)));
    assert!(net.open_descriptors().is_empty());
}

#[test]
fn open_configures_the_serial_line() {
    let rig = Rig::open(fast_config(64)).unwrap();
    assert_eq!(rig.serial.config(), Some(common::uart()));
}

#[test]
fn close_acknowledges_exit_and_releases_the_descriptor() {
    let mut rig = Rig::open(fast_config(64)).unwrap();
    let fd = rig.bridge.descriptor().unwrap();

    rig.bridge.close();
    assert!(rig.bridge.is_closed());
    assert_eq!(rig.bridge.phase(), WorkerPhase::Exited);
    assert_eq!(rig.net.closed_descriptors(), vec![fd]);
    assert!(matches!(rig.bridge.write(b"x"), Err(BridgeError::Closed)));

    rig.bridge.close();
    assert_eq!(rig.net.closed_descriptors(), vec![fd]);
}

#[test]
fn idle_worker_waits_for_a_signal() {
    let rig = Rig::open(fast_config(64)).unwrap();
    let waiting = wait_until(SETTLE, || rig.bridge.phase() == WorkerPhase::WaitingSignal);
    assert!(waiting);
    assert_eq!(rig.bridge.telemetry().drain_cycles, 0);
}
