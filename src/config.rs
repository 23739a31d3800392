//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default free-space floor for the primary storage (10 MiB).
pub const DEFAULT_MIN_FREE_SPACE: u64 = 10 * 1024 * 1024;

/// Default timeout for a single device call, in seconds.
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 20;

/// Default depth of the session command channel.
pub const DEFAULT_COMMAND_BUFFER: usize = 64;

/// Tunables for a [`DeviceSession`](crate::DeviceSession).
///
/// Missing fields fall back to their defaults when loaded from JSON:
///
/// ```
/// use mtplib::SessionConfig;
///
/// let config = SessionConfig::from_json(r#"{ "io_timeout_secs": 5 }"#).unwrap();
/// assert_eq!(config.io_timeout_secs, 5);
/// assert_eq!(config.min_free_space, mtplib::config::DEFAULT_MIN_FREE_SPACE);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Opening fails if the primary storage has less free space than this
    pub min_free_space: u64,
    /// Upper bound for each device call
    pub io_timeout_secs: u64,
    /// Commands that may queue up before callers wait
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_free_space: DEFAULT_MIN_FREE_SPACE,
            io_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn min_free_space(mut self, bytes: u64) -> Self {
        self.min_free_space = bytes;
        self
    }

    pub fn io_timeout_secs(mut self, secs: u64) -> Self {
        self.io_timeout_secs = secs;
        self
    }

    pub fn command_buffer(mut self, depth: usize) -> Self {
        self.command_buffer = depth;
        self
    }

    pub(crate) fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs.max(1))
    }

    pub(crate) fn channel_depth(&self) -> usize {
        self.command_buffer.max(1)
    }
}
