// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Configuration records for the serial line, bridge tuning and supervision.
// Author: Lukas Bower

//! Configuration surface of the bridge.
//!
//! [`UartConfig`] is a plain record with no defaults: every line parameter comes
//! from the caller. [`BridgeConfig`] and [`SupervisorConfig`] carry tuning
//! knobs whose defaults match the timings the bridge was characterised with.
//! All records load from TOML.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::ring::MAX_CAPACITY;

/// Default receive ring capacity in bytes.
pub const DEFAULT_RX_CAPACITY: usize = 8196;
/// Quiet period after the last received byte before a burst is drained.
pub const DEFAULT_QUIET_PERIOD_MS: u64 = 100;
/// Poll interval while waiting for the line to go quiet.
pub const DEFAULT_QUIESCE_POLL_MS: u64 = 5;
/// Upper bound on the quiescence wait for a line that never goes quiet.
pub const DEFAULT_QUIESCE_LIMIT_MS: u64 = 1_000;
/// Bounded waits for the transmit gate before reporting busy.
pub const DEFAULT_TX_GATE_RETRIES: u32 = 3;
/// Length of each transmit gate wait.
pub const DEFAULT_TX_RETRY_MS: u64 = 10;
/// Longest the worker sleeps without beating while idle.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
/// How long `close` waits for the worker to acknowledge its exit.
pub const DEFAULT_EXIT_TIMEOUT_MS: u64 = 500;
/// Supervisor monitoring period.
pub const DEFAULT_SUPERVISOR_PERIOD_MS: u64 = 10_000;
/// Supervisor wait for a heartbeat before declaring a worker stalled.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 2_000;

/// Parity setting of the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit.
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum WordLength {
    /// Seven data bits.
    Seven,
    /// Eight data bits.
    Eight,
}

impl TryFrom<u8> for WordLength {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            _ => Err(ConfigError::Invalid("word_length must be 7 or 8")),
        }
    }
}

impl WordLength {
    /// Number of data bits.
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

/// Stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum StopBits {
    /// One stop bit.
    One,
    /// Two stop bits.
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(ConfigError::Invalid("stop_bits must be 1 or 2")),
        }
    }
}

/// Serial line parameters handed to the driver at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UartConfig {
    /// Line rate in bits per second.
    pub baud_rate: u32,
    /// Data bits per character.
    pub word_length: WordLength,
    /// Parity setting.
    pub parity: Parity,
    /// Stop bits per character.
    pub stop_bits: StopBits,
    /// Hardware flow control request. Recorded and passed to the driver only.
    pub flow_control: bool,
}

impl UartConfig {
    /// Reject parameters no driver can honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be non-zero"));
        }
        Ok(())
    }
}

/// Bridge tuning plus the serial line parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Serial line parameters.
    pub uart: UartConfig,
    /// Receive ring capacity in bytes.
    #[serde(default = "default_rx_capacity")]
    pub rx_capacity: usize,
    /// Quiet period that marks the end of a receive burst.
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
    /// Poll interval used while waiting for the quiet period.
    #[serde(default = "default_quiesce_poll_ms")]
    pub quiesce_poll_ms: u64,
    /// Cap on the quiescence wait; the burst is drained anyway once reached.
    #[serde(default = "default_quiesce_limit_ms")]
    pub quiesce_limit_ms: u64,
    /// Number of bounded waits on the transmit gate.
    #[serde(default = "default_tx_gate_retries")]
    pub tx_gate_retries: u32,
    /// Length of each transmit gate wait.
    #[serde(default = "default_tx_retry_ms")]
    pub tx_retry_ms: u64,
    /// Idle heartbeat interval of the worker.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Bound on the wait for the worker's exit acknowledgement.
    #[serde(default = "default_exit_timeout_ms")]
    pub exit_timeout_ms: u64,
    /// Hand transmit blocks to the driver's asynchronous path when available.
    #[serde(default)]
    pub dma_tx: bool,
}

impl BridgeConfig {
    /// Build a configuration with default tuning around the supplied line parameters.
    #[must_use]
    pub fn new(uart: UartConfig) -> Self {
        Self {
            uart,
            rx_capacity: DEFAULT_RX_CAPACITY,
            quiet_period_ms: DEFAULT_QUIET_PERIOD_MS,
            quiesce_poll_ms: DEFAULT_QUIESCE_POLL_MS,
            quiesce_limit_ms: DEFAULT_QUIESCE_LIMIT_MS,
            tx_gate_retries: DEFAULT_TX_GATE_RETRIES,
            tx_retry_ms: DEFAULT_TX_RETRY_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            exit_timeout_ms: DEFAULT_EXIT_TIMEOUT_MS,
            dma_tx: false,
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check every field against the limits the bridge enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.uart.validate()?;
        if self.rx_capacity == 0 || self.rx_capacity > MAX_CAPACITY {
            return Err(ConfigError::Invalid("rx_capacity out of range"));
        }
        if self.quiesce_poll_ms == 0 {
            return Err(ConfigError::Invalid("quiesce_poll_ms must be non-zero"));
        }
        if self.quiesce_limit_ms < self.quiet_period_ms {
            return Err(ConfigError::Invalid(
                "quiesce_limit_ms must not be shorter than quiet_period_ms",
            ));
        }
        if self.tx_gate_retries == 0 {
            return Err(ConfigError::Invalid("tx_gate_retries must be at least 1"));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat_interval_ms must be non-zero"));
        }
        Ok(())
    }

    /// Quiet period as a duration.
    #[must_use]
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    /// Quiescence poll interval as a duration.
    #[must_use]
    pub fn quiesce_poll(&self) -> Duration {
        Duration::from_millis(self.quiesce_poll_ms)
    }

    /// Quiescence cap as a duration.
    #[must_use]
    pub fn quiesce_limit(&self) -> Duration {
        Duration::from_millis(self.quiesce_limit_ms)
    }

    /// Transmit gate wait as a duration.
    #[must_use]
    pub fn tx_retry(&self) -> Duration {
        Duration::from_millis(self.tx_retry_ms)
    }

    /// Idle heartbeat interval as a duration.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Exit acknowledgement bound as a duration.
    #[must_use]
    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }
}

/// Supervisor timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Delay between monitoring rounds.
    #[serde(default = "default_supervisor_period_ms")]
    pub period_ms: u64,
    /// Heartbeat wait applied to services watched without an explicit timeout.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_SUPERVISOR_PERIOD_MS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
        }
    }
}

impl SupervisorConfig {
    /// Monitoring period as a duration.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Default heartbeat timeout as a duration.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

fn default_rx_capacity() -> usize {
    DEFAULT_RX_CAPACITY
}

fn default_quiet_period_ms() -> u64 {
    DEFAULT_QUIET_PERIOD_MS
}

fn default_quiesce_poll_ms() -> u64 {
    DEFAULT_QUIESCE_POLL_MS
}

fn default_quiesce_limit_ms() -> u64 {
    DEFAULT_QUIESCE_LIMIT_MS
}

fn default_tx_gate_retries() -> u32 {
    DEFAULT_TX_GATE_RETRIES
}

fn default_tx_retry_ms() -> u64 {
    DEFAULT_TX_RETRY_MS
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_exit_timeout_ms() -> u64 {
    DEFAULT_EXIT_TIMEOUT_MS
}

fn default_supervisor_period_ms() -> u64 {
    DEFAULT_SUPERVISOR_PERIOD_MS
}

fn default_heartbeat_timeout_ms() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT_MS
}
