// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Error taxonomy surfaced by the bridge handle and configuration loaders.
// Author: Lukas Bower

//! Errors returned to callers of the bridge.
//!
//! There is no buffer overflow variant: the receive ring overwrites its
//! oldest bytes and counts them instead of failing. Missed heartbeats are
//! handled inside the supervisor and never reach a caller either.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::network::NetError;
use crate::serial::SerialError;

/// Errors raised by [`crate::Bridge`] operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Argument rejected before any state was touched.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Payload does not fit the transmit slot.
    #[error("payload of {requested} bytes exceeds the {capacity}-byte transmit slot")]
    TooLarge {
        /// Bytes supplied by the caller.
        requested: usize,
        /// Transmit slot capacity.
        capacity: usize,
    },
    /// Descriptor allocation failed while opening the bridge.
    #[error("descriptor allocation failed: {0}")]
    Resource(#[source] NetError),
    /// Transmit gate could not be acquired within the retry budget.
    #[error("transmit gate busy after {attempts} attempts")]
    Busy {
        /// Number of bounded waits performed before giving up.
        attempts: u32,
    },
    /// The scheduler refused to create a task.
    #[error("failed to spawn {task} task: {source}")]
    Spawn {
        /// Name of the task that could not be created.
        task: &'static str,
        /// Error reported by the thread builder.
        #[source]
        source: io::Error,
    },
    /// The bridge has been closed or its worker has exited.
    #[error("bridge is closed")]
    Closed,
    /// The serial line rejected its configuration.
    #[error("serial line error: {0}")]
    Serial(#[from] SerialError),
    /// Configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BridgeError {
    /// Return true when the caller may retry the same request unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

/// Errors raised while loading or validating configuration records.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that failed to load.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// Configuration text is not valid TOML for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A field holds a value the bridge cannot run with.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_busy_is_retryable() {
        assert!(BridgeError::Busy { attempts: 3 }.is_retryable());
        assert!(!BridgeError::Closed.is_retryable());
        assert!(!BridgeError::InvalidInput("empty").is_retryable());
    }

    #[test]
    fn busy_message_names_attempts() {
        let err = BridgeError::Busy { attempts: 3 };
        assert_eq!(err.to_string(), "transmit gate busy after 3 attempts");
    }
}
