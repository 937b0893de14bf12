// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Host-mode driver that feeds a simulated UART through the bridge.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! `uart-bridge` replays a byte stream through a loopback UART as a series of
//! receive interrupts. Drained bursts go to a TCP peer with `--connect`, or to
//! stdout otherwise. With `--supervise` the bridge runs under the heartbeat
//! supervisor.

use std::fs;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, info, warn};
use portable_atomic::{AtomicBool, Ordering};
use serde::Deserialize;
use uart_bridge::network::memory::MemoryNetwork;
use uart_bridge::network::tcp::TcpNetwork;
use uart_bridge::serial::loopback::LoopbackSerial;
use uart_bridge::worker::TX_SLOT_CAPACITY;
use uart_bridge::{
    Bridge, BridgeConfig, BridgeError, BridgeService, BridgeSlot, BridgeTelemetry, ByteSink,
    Clock, Descriptor, Heartbeat, InterruptHandoff, NetError, NetworkSink, NetworkStack,
    SerialLine, Supervisor, SupervisorConfig, SystemClock, WorkerPhase,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE_MARGIN: Duration = Duration::from_millis(250);
const INBOUND_POLL: Duration = Duration::from_millis(100);

/// CLI options for the bridge driver.
#[derive(Debug, Parser)]
#[command(author, version, about = "Replay a byte stream through the UART bridge")]
struct Args {
    /// TOML file with a `[bridge]` table and an optional `[supervisor]` table.
    #[arg(long)]
    config: PathBuf,

    /// File replayed as received UART data; stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Forward drained bursts to this TCP peer instead of stdout.
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// Run the bridge under the heartbeat supervisor.
    #[arg(long)]
    supervise: bool,

    /// Bytes delivered per simulated receive interrupt.
    #[arg(long, default_value_t = 64)]
    burst: usize,

    /// Delay between simulated interrupts in milliseconds.
    #[arg(long, default_value_t = 0)]
    gap_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bridge: BridgeConfig,
    #[serde(default)]
    supervisor: SupervisorConfig,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
        config.bridge.validate().context("validate [bridge]")?;
        Ok(config)
    }
}

/// Where drained bursts end up.
#[derive(Clone)]
enum Output {
    Stdout,
    Tcp(Arc<TcpNetwork>),
}

impl Output {
    fn network(&self) -> Arc<dyn NetworkStack> {
        match self {
            Self::Stdout => Arc::new(MemoryNetwork::new()),
            Self::Tcp(net) => Arc::clone(net) as Arc<dyn NetworkStack>,
        }
    }

    fn sink(&self, net: &Arc<dyn NetworkStack>) -> Box<dyn ByteSink> {
        match self {
            Self::Stdout => Box::new(|_: Descriptor, chunk: &[u8]| -> Result<usize, NetError> {
                let mut stdout = io::stdout().lock();
                stdout.write_all(chunk)?;
                stdout.flush()?;
                Ok(chunk.len())
            }),
            Self::Tcp(_) => Box::new(NetworkSink::new(Arc::clone(net))),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = FileConfig::load(&args.config)?;
    let input = read_input(args.input.as_deref())?;

    let output = match args.connect {
        Some(peer) => Output::Tcp(Arc::new(TcpNetwork::new(peer, CONNECT_TIMEOUT))),
        None => Output::Stdout,
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let serial = LoopbackSerial::new();

    let telemetry = if args.supervise {
        run_supervised(&args, config, &input, &output, clock, &serial)?
    } else {
        run_direct(&args, config.bridge, &input, &output, clock, &serial)?
    };

    info!(
        "received {} bytes, forwarded {}, overwritten {}, send errors {}, drain cycles {}",
        telemetry.received,
        telemetry.forwarded,
        telemetry.overwritten,
        telemetry.send_errors,
        telemetry.drain_cycles
    );
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => fs::read(path).with_context(|| format!("read {}", path.display())),
        None => {
            let mut data = Vec::new();
            io::stdin().read_to_end(&mut data).context("read stdin")?;
            Ok(data)
        }
    }
}

fn run_direct(
    args: &Args,
    config: BridgeConfig,
    input: &[u8],
    output: &Output,
    clock: Arc<dyn Clock>,
    serial: &LoopbackSerial,
) -> Result<BridgeTelemetry> {
    let net = output.network();
    let sink = output.sink(&net);
    let mut bridge = Bridge::open(
        config,
        Box::new(serial.clone()) as Box<dyn SerialLine>,
        Arc::clone(&net),
        sink,
        Heartbeat::new(),
        clock,
    )
    .context("open bridge")?;

    let done = AtomicBool::new(false);
    thread::scope(|scope| -> Result<()> {
        if let (Output::Tcp(tcp), Some(fd)) = (output, bridge.descriptor()) {
            let stream = tcp.try_clone_stream(fd).context("clone peer stream")?;
            let (done, bridge) = (&done, &bridge);
            scope.spawn(move || {
                forward_inbound(stream, &|| done.load(Ordering::Acquire), &|data| {
                    bridge.write(data)
                });
            });
        }
        let handoff = bridge.handoff();
        replay(args, input, serial, || Some(handoff.clone()));
        wait_settled(bridge.config(), || Some(settle_status(&bridge)));
        done.store(true, Ordering::Release);
        Ok(())
    })?;

    let telemetry = bridge.telemetry();
    bridge.close();
    Ok(telemetry)
}

fn run_supervised(
    args: &Args,
    config: FileConfig,
    input: &[u8],
    output: &Output,
    clock: Arc<dyn Clock>,
    serial: &LoopbackSerial,
) -> Result<BridgeTelemetry> {
    let settle_config = config.bridge.clone();
    let net = output.network();
    let parts_net = Arc::clone(&net);
    let parts_output = output.clone();
    let parts_serial = serial.clone();
    let service = BridgeService::new(
        "uart-bridge",
        config.bridge,
        Arc::clone(&net),
        clock,
        Box::new(move || {
            let serial: Box<dyn SerialLine> = Box::new(parts_serial.clone());
            (serial, parts_output.sink(&parts_net))
        }),
    );
    let slot = service.slot();

    let mut supervisor = Supervisor::new(config.supervisor);
    supervisor
        .watch(Box::new(service), None)
        .context("start supervised bridge")?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let monitor = {
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("uart-bridge-supervisor".into())
            .spawn(move || {
                supervisor.run(&shutdown);
                supervisor
            })
            .context("spawn supervisor")?
    };

    if let Output::Tcp(tcp) = output {
        spawn_inbound(Arc::clone(tcp), slot.clone(), Arc::clone(&shutdown));
    }

    let mut cached: Option<(u64, InterruptHandoff)> = None;
    replay(args, input, serial, || {
        let generation = slot.generation();
        match &cached {
            Some((seen, handoff)) if *seen == generation => Some(handoff.clone()),
            _ => {
                let handoff = slot.handoff()?;
                cached = Some((generation, handoff.clone()));
                Some(handoff)
            }
        }
    });
    wait_settled(&settle_config, || slot.with(settle_status));
    let telemetry = slot.with(Bridge::telemetry).unwrap_or_default();

    shutdown.store(true, Ordering::Release);
    match monitor.join() {
        Ok(supervisor) => {
            if let Some(restarts) = supervisor.restarts("uart-bridge") {
                info!("supervisor performed {restarts} restarts");
            }
        }
        Err(_) => warn!("supervisor thread panicked"),
    }
    Ok(telemetry)
}

/// Push `input` into the loopback FIFO one burst at a time, raising a receive
/// interrupt after each burst.
fn replay(
    args: &Args,
    input: &[u8],
    serial: &LoopbackSerial,
    mut handoff: impl FnMut() -> Option<InterruptHandoff>,
) {
    let mut irq_side = serial.clone();
    for burst in input.chunks(args.burst.max(1)) {
        serial.push_rx(burst);
        match handoff() {
            Some(handoff) => {
                handoff.on_rx_interrupt(&mut irq_side);
            }
            None => warn!("no bridge instance running, {} bytes stay in the FIFO", burst.len()),
        }
        if args.gap_ms > 0 {
            thread::sleep(Duration::from_millis(args.gap_ms));
        }
    }
}

fn settle_status(bridge: &Bridge) -> (usize, WorkerPhase) {
    (bridge.rx_cursors().available, bridge.phase())
}

/// Wait until the worker has drained everything it received.
///
/// `status` reports unread bytes and the worker phase, or `None` while no
/// instance is running. It is sampled once per poll so a caller backed by the
/// bridge slot only holds the slot for the duration of one sample. Returns
/// false when the deadline passes first.
fn wait_settled(
    config: &BridgeConfig,
    mut status: impl FnMut() -> Option<(usize, WorkerPhase)>,
) -> bool {
    let deadline = Instant::now()
        + Duration::from_millis(config.quiesce_limit_ms.max(config.quiet_period_ms))
        + Duration::from_millis(config.heartbeat_interval_ms)
        + SETTLE_MARGIN;
    let poll = Duration::from_millis(config.quiesce_poll_ms.max(1));
    while Instant::now() < deadline {
        if status() == Some((0, WorkerPhase::WaitingSignal)) {
            return true;
        }
        thread::sleep(poll);
    }
    warn!("bridge still busy after settle deadline");
    false
}

/// Copy peer data to the serial line until `stop` reports true or the peer
/// goes away.
fn forward_inbound(
    mut stream: TcpStream,
    stop: &dyn Fn() -> bool,
    write: &dyn Fn(&[u8]) -> Result<usize, BridgeError>,
) {
    if let Err(err) = stream.set_read_timeout(Some(INBOUND_POLL)) {
        warn!("inbound forwarding disabled: {err}");
        return;
    }
    let mut buf = [0u8; 1024];
    while !stop() {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(len) => send_inbound(write, &buf[..len]),
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(err) => {
                debug!("peer read failed: {err}");
                return;
            }
        }
    }
}

fn spawn_inbound(tcp: Arc<TcpNetwork>, slot: BridgeSlot, shutdown: Arc<AtomicBool>) {
    let spawned = thread::Builder::new()
        .name("uart-bridge-inbound".into())
        .spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                let stream = slot
                    .with(Bridge::descriptor)
                    .flatten()
                    .and_then(|fd| Some((fd, tcp.try_clone_stream(fd).ok()?)));
                let Some((fd, stream)) = stream else {
                    thread::sleep(INBOUND_POLL);
                    continue;
                };
                // Follow the bridge across restarts: a new instance has a new descriptor.
                let stop = || {
                    shutdown.load(Ordering::Acquire)
                        || slot.with(Bridge::descriptor).flatten() != Some(fd)
                };
                forward_inbound(stream, &stop, &|data| slot.write(data));
            }
        });
    if let Err(err) = spawned {
        warn!("inbound forwarding disabled: {err}");
    }
}

fn send_inbound(write: &dyn Fn(&[u8]) -> Result<usize, BridgeError>, data: &[u8]) {
    for chunk in data.chunks(TX_SLOT_CAPACITY) {
        loop {
            match write(chunk) {
                Ok(_) => break,
                Err(err) if err.is_retryable() => continue,
                Err(err) => {
                    warn!("dropping {} inbound bytes: {err}", chunk.len());
                    return;
                }
            }
        }
    }
}
