//! Traversal technique identity and the peer-side plugin contract

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Wire identifier of a traversal technique
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TechniqueCode(u32);

impl TechniqueCode {
    /// The direct technique: no traversal, connect on the shared local port
    pub const DIRECT: Self = Self(0);

    /// Reserved for the broker's own meta-handler; never sent by peers
    pub const BROKER: Self = Self(u32::MAX);

    /// Create a code from its wire value
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Wire value
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Whether this is the reserved broker code
    pub const fn is_reserved(self) -> bool {
        self.0 == u32::MAX
    }
}

impl From<u32> for TechniqueCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for TechniqueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptive metadata every technique publishes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TechniqueMetadata {
    /// Human readable technique name, used in error context and logs
    pub name: String,
    /// Technique implementation version
    pub version: String,
    /// Code announced on the wire
    pub code: TechniqueCode,
    /// Whether the technique works when both peers sit behind NATs
    pub traverses_nat: bool,
    /// Upper bound on connection setup the technique expects
    pub max_setup_time: Duration,
}

impl TechniqueMetadata {
    /// Create metadata for a technique
    pub fn new(name: impl Into<String>, version: impl Into<String>, code: TechniqueCode) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            code,
            traverses_nat: false,
            max_setup_time: Duration::from_secs(30),
        }
    }

    /// Mark the technique as NAT traversing
    pub fn with_nat_traversal(mut self, traverses_nat: bool) -> Self {
        self.traverses_nat = traverses_nat;
        self
    }

    /// Set the expected setup time bound
    pub fn with_max_setup_time(mut self, max_setup_time: Duration) -> Self {
        self.max_setup_time = max_setup_time;
        self
    }
}

/// Peer-side contract of a connection establishment technique.
///
/// One instance owns one control connection and serves one logical session;
/// every operation takes `&mut self`, so callers cannot interleave them.
#[async_trait]
pub trait TraversalTechnique: Send {
    /// Metadata describing the technique
    fn metadata(&self) -> &TechniqueMetadata;

    /// Ask the mediator for `target_id` and open a connection to it
    async fn create_source_side_connection(
        &mut self,
        target_id: &str,
        mediator: SocketAddr,
    ) -> Result<TcpStream>;

    /// Wait for a source peer to connect to the registered target
    async fn create_target_side_connection(
        &mut self,
        target_id: &str,
        mediator: SocketAddr,
    ) -> Result<TcpStream>;

    /// Register `target_id` at the mediator and keep the registration alive
    async fn register_target_at_mediator(
        &mut self,
        target_id: &str,
        mediator: SocketAddr,
    ) -> Result<()>;

    /// Remove the registration of `target_id` and stop its keep-alive
    async fn deregister_target_at_mediator(
        &mut self,
        target_id: &str,
        mediator: SocketAddr,
    ) -> Result<()>;

    /// A new, unconnected instance with the same metadata and configuration
    fn fresh_instance(&self) -> Box<dyn TraversalTechnique>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_code() {
        assert!(TechniqueCode::BROKER.is_reserved());
        assert!(!TechniqueCode::DIRECT.is_reserved());
        assert_eq!(TechniqueCode::BROKER.value(), u32::MAX);
        assert_eq!(TechniqueCode::from(0), TechniqueCode::DIRECT);
    }

    #[test]
    fn test_metadata_builder() {
        let metadata = TechniqueMetadata::new("Relay", "0.3", TechniqueCode::new(2))
            .with_nat_traversal(true)
            .with_max_setup_time(Duration::from_secs(5));
        assert!(metadata.traverses_nat);
        assert_eq!(metadata.max_setup_time, Duration::from_secs(5));
        assert_eq!(metadata.code.value(), 2);
    }
}
