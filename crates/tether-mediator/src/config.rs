//! Mediator configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tether_core::config::env_override;
use tether_core::{Result, TetherConfig, TetherError};

/// Settings for the mediator server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// Address control connections are accepted on
    pub listen_addr: SocketAddr,
    /// Registrations not refreshed within this window are dropped
    pub registration_ttl_ms: u64,
    /// How often stale registrations are swept
    pub sweep_interval_ms: u64,
    /// Largest message accepted from a peer
    pub max_message_size: usize,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 10300)),
            // Three missed keep-alives at the default 60s period
            registration_ttl_ms: 180_000,
            sweep_interval_ms: 30_000,
            max_message_size: tether_core::messages::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl MediatorConfig {
    /// Loopback listener on an ephemeral port with a fast sweep
    pub fn testing() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            registration_ttl_ms: 5_000,
            sweep_interval_ms: 100,
            ..Default::default()
        }
    }

    /// Registration time-to-live
    pub fn registration_ttl(&self) -> Duration {
        Duration::from_millis(self.registration_ttl_ms)
    }

    /// Sweep period
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl TetherConfig for MediatorConfig {
    fn merge_with_env(&mut self) -> Result<()> {
        if let Some(listen_addr) = env_override("TETHER_LISTEN")? {
            self.listen_addr = listen_addr;
        }
        if let Some(ttl) = env_override("TETHER_REGISTRATION_TTL_MS")? {
            self.registration_ttl_ms = ttl;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.registration_ttl_ms == 0 {
            return Err(TetherError::config("registration_ttl_ms must be greater than 0"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(TetherError::config("sweep_interval_ms must be greater than 0"));
        }
        if self.max_message_size < tether_core::messages::HEADER_LEN {
            return Err(TetherError::config(
                "max_message_size must hold at least a message header",
            ));
        }
        Ok(())
    }
}
