//! Mediator-side handler contract and the per-connection link it answers on

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tether_core::{Message, Result, TechniqueCode};
use tokio::io::AsyncWrite;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one accepted control connection for the lifetime of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Write side of one peer's control connection as seen by the mediator
pub struct MediatorLink {
    id: ConnectionId,
    peer_addr: SocketAddr,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl MediatorLink {
    /// Wrap the write half of a connection from `peer_addr`
    pub fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Self {
        Self {
            id,
            peer_addr,
            writer,
        }
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address the connection was accepted from
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Write one message to the peer
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        message.write_to(&mut self.writer).await
    }
}

impl fmt::Debug for MediatorLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediatorLink")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

/// Mediator-side half of a traversal technique.
///
/// A handler answers connection requests for its technique code on the
/// requesting peer's link. Handlers are shared across connections.
#[async_trait]
pub trait ConnectionRequestHandler: Send + Sync {
    /// Code the handler serves
    fn technique(&self) -> TechniqueCode;

    /// Human readable name for logs
    fn name(&self) -> &str;

    /// Answer `request`, received on `link`
    async fn handle_connection_request(
        &self,
        request: &Message,
        link: &mut MediatorLink,
    ) -> Result<()>;
}
