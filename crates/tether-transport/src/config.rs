//! Control channel configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tether_core::config::env_override;
use tether_core::{Result, TetherConfig, TetherError};

/// Settings for a peer's control channel and the sockets derived from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlChannelConfig {
    /// Local port for the control connection; 0 picks an ephemeral port
    pub local_port: u16,
    /// Bound on connecting to the mediator or to a peer
    pub connect_timeout_ms: u64,
    /// Bound on waiting for the mediator's response to a connection request
    pub response_timeout_ms: u64,
    /// Bound on waiting for an inbound peer connection
    pub accept_timeout_ms: u64,
    /// Period between registration refreshes
    pub keep_alive_interval_ms: u64,
    /// Largest message accepted from the mediator
    pub max_message_size: usize,
}

impl Default for ControlChannelConfig {
    fn default() -> Self {
        Self {
            local_port: 0,
            connect_timeout_ms: 10_000,
            response_timeout_ms: 30_000,
            accept_timeout_ms: 120_000,
            keep_alive_interval_ms: 60_000,
            max_message_size: tether_core::messages::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ControlChannelConfig {
    /// Short timeouts and a fast keep-alive, for tests and local demos
    pub fn testing() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            response_timeout_ms: 2_000,
            accept_timeout_ms: 5_000,
            keep_alive_interval_ms: 100,
            ..Default::default()
        }
    }

    /// Builder-style override of the keep-alive period, rounded up to whole
    /// milliseconds (at least one)
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        let millis = interval.as_nanos().div_ceil(1_000_000).max(1);
        self.keep_alive_interval_ms = millis.try_into().unwrap_or(u64::MAX);
        self
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Response timeout
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Accept timeout
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    /// Keep-alive period
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    /// Load from an optional file with `TETHER_*` overrides applied
    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        <Self as TetherConfig>::load(path)
    }
}

impl TetherConfig for ControlChannelConfig {
    fn merge_with_env(&mut self) -> Result<()> {
        if let Some(port) = env_override("TETHER_LOCAL_PORT")? {
            self.local_port = port;
        }
        if let Some(interval) = env_override("TETHER_KEEP_ALIVE_MS")? {
            self.keep_alive_interval_ms = interval;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let timeouts = [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("response_timeout_ms", self.response_timeout_ms),
            ("accept_timeout_ms", self.accept_timeout_ms),
            ("keep_alive_interval_ms", self.keep_alive_interval_ms),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(TetherError::config(format!("{field} must be greater than 0")));
            }
        }
        if self.max_message_size < tether_core::messages::HEADER_LEN {
            return Err(TetherError::config(
                "max_message_size must hold at least a message header",
            ));
        }
        Ok(())
    }
}
