//! # Tether Direct
//!
//! The simplest traversal technique: no NAT traversal at all. The target
//! listens on the local port of its control connection, which the mediator
//! observed as its endpoint, and the source connects there from the local
//! port of its own control connection.
//!
//! ```no_run
//! # async fn demo(mediator: std::net::SocketAddr) -> tether_core::Result<()> {
//! use tether_core::TraversalTechnique;
//! use tether_direct::DirectConnection;
//!
//! let mut target = DirectConnection::default();
//! target.register_target_at_mediator("peer-A", mediator).await?;
//! let inbound = target.create_target_side_connection("peer-A", mediator).await?;
//! # drop(inbound);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

use async_trait::async_trait;
use std::net::SocketAddr;
use tether_core::{Result, TechniqueCode, TechniqueMetadata, TraversalTechnique};
use tether_transport::{ControlChannel, ControlChannelConfig};
use tokio::net::TcpStream;

/// Name the technique reports in metadata and errors
pub const NAME: &str = "Directconnection";

/// Technique version
pub const VERSION: &str = "1.0";

/// Peer side of the direct technique.
///
/// Owns one control channel; use [`TraversalTechnique::fresh_instance`] for
/// another session.
#[derive(Debug)]
pub struct DirectConnection {
    metadata: TechniqueMetadata,
    channel: ControlChannel,
}

impl DirectConnection {
    /// Unconnected instance using `config` for its control channel
    pub fn new(config: ControlChannelConfig) -> Self {
        let metadata =
            TechniqueMetadata::new(NAME, VERSION, TechniqueCode::DIRECT).with_nat_traversal(false);
        Self {
            metadata,
            channel: ControlChannel::new(NAME, config),
        }
    }

    /// Unconnected copy with the same metadata and channel configuration
    pub fn fresh(&self) -> Self {
        Self {
            metadata: self.metadata.clone(),
            channel: ControlChannel::new(NAME, self.channel.config().clone()),
        }
    }

    /// The underlying control channel
    pub fn control_channel(&self) -> &ControlChannel {
        &self.channel
    }

    async fn source_side(&mut self, target_id: &str, mediator: SocketAddr) -> Result<TcpStream> {
        self.channel.connect(mediator).await?;
        let endpoint = self
            .channel
            .request_connection(target_id, TechniqueCode::DIRECT)
            .await?;
        tracing::info!(target_id = %target_id, endpoint = %endpoint, "Connecting to target");
        self.channel.create_outgoing_connection(endpoint).await
    }

    async fn target_side(&mut self, mediator: SocketAddr) -> Result<TcpStream> {
        self.channel.connect(mediator).await?;
        self.channel.accept_incoming_connection().await
    }
}

impl Default for DirectConnection {
    fn default() -> Self {
        Self::new(ControlChannelConfig::default())
    }
}

#[async_trait]
impl TraversalTechnique for DirectConnection {
    fn metadata(&self) -> &TechniqueMetadata {
        &self.metadata
    }

    async fn create_source_side_connection(
        &mut self,
        target_id: &str,
        mediator: SocketAddr,
    ) -> Result<TcpStream> {
        self.source_side(target_id, mediator).await.map_err(|error| {
            tracing::error!(target_id = %target_id, error = %error, "Source side connection failed");
            error.within_technique(NAME)
        })
    }

    async fn create_target_side_connection(
        &mut self,
        target_id: &str,
        mediator: SocketAddr,
    ) -> Result<TcpStream> {
        self.target_side(mediator).await.map_err(|error| {
            tracing::error!(target_id = %target_id, error = %error, "Target side connection failed");
            error.within_technique(NAME)
        })
    }

    async fn register_target_at_mediator(
        &mut self,
        target_id: &str,
        mediator: SocketAddr,
    ) -> Result<()> {
        self.channel
            .register(target_id, mediator)
            .await
            .map_err(|error| error.within_technique(NAME))
    }

    async fn deregister_target_at_mediator(
        &mut self,
        target_id: &str,
        mediator: SocketAddr,
    ) -> Result<()> {
        self.channel
            .deregister(target_id, mediator)
            .await
            .map_err(|error| error.within_technique(NAME))
    }

    fn fresh_instance(&self) -> Box<dyn TraversalTechnique> {
        Box::new(self.fresh())
    }
}
