//! Mediator server
//!
//! Accepts control connections, records REGISTER/DEREGISTER traffic in the
//! [`RegistrationTable`] and hands connection requests to the broker. Each
//! connection is served by its own task; registrations die with the
//! connection that made them or when they go unrefreshed for longer than the
//! configured time-to-live.

use crate::broker::RendezvousBroker;
use crate::config::MediatorConfig;
use crate::handler::{ConnectionId, MediatorLink};
use crate::handlers::builtin_registry;
use crate::registrations::RegistrationTable;
use crate::registry::TechniqueRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tether_core::{
    Message, MessageClass, MessageMethod, MessageReader, Result, TetherError, Username,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// A bound, not yet running mediator
pub struct MediatorServer {
    config: MediatorConfig,
    listener: TcpListener,
    broker: Arc<RendezvousBroker>,
    registrations: Arc<RegistrationTable>,
}

impl MediatorServer {
    /// Bind the listener. `registrations` must be the table the registry's
    /// handlers read from.
    pub async fn bind(
        config: MediatorConfig,
        registry: TechniqueRegistry,
        registrations: Arc<RegistrationTable>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|e| TetherError::Io {
                message: format!("bind {}: {e}", config.listen_addr),
            })?;
        tracing::info!(
            listen = %listener.local_addr()?,
            techniques = ?registry,
            "Mediator listening"
        );
        Ok(Self {
            config,
            listener,
            broker: Arc::new(RendezvousBroker::new(Arc::new(registry))),
            registrations,
        })
    }

    /// Bind with every built-in technique handler registered
    pub async fn with_builtin_techniques(config: MediatorConfig) -> Result<Self> {
        let registrations = Arc::new(RegistrationTable::new());
        let registry = builtin_registry(registrations.clone())?.build();
        Self::bind(config, registry, registrations).await
    }

    /// Bound listener address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Registrations shared with the connection tasks
    pub fn registrations(&self) -> Arc<RegistrationTable> {
        self.registrations.clone()
    }

    /// Broker handling connection requests
    pub fn broker(&self) -> &RendezvousBroker {
        &self.broker
    }

    /// Serve until `shutdown` turns true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let reader = MessageReader::new(self.config.max_message_size);
        let ttl = self.config.registration_ttl();
        let period = self.config.sweep_interval();
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            reader,
                            self.broker.clone(),
                            self.registrations.clone(),
                        ));
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "Failed to accept control connection");
                    }
                },
                _ = sweep.tick() => {
                    let expired = self.registrations.expire(Instant::now(), ttl);
                    if !expired.is_empty() {
                        tracing::info!(targets = ?expired, "Expired stale registrations");
                    }
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(error) = joined {
                        if error.is_panic() {
                            tracing::error!(error = %error, "Connection task panicked");
                        }
                    }
                }
            }
        }

        tracing::info!(open_connections = connections.len(), "Mediator shutting down");
        connections.shutdown().await;
        Ok(())
    }

    /// Run on a background task
    pub fn spawn(self) -> Result<MediatorHandle> {
        let local_addr = self.local_addr()?;
        let registrations = self.registrations();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        Ok(MediatorHandle {
            local_addr,
            registrations,
            shutdown,
            task,
        })
    }
}

impl std::fmt::Debug for MediatorServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediatorServer")
            .field("listen", &self.listener.local_addr().ok())
            .field("registrations", &self.registrations.len())
            .finish_non_exhaustive()
    }
}

/// Handle to a mediator running on a background task
#[derive(Debug)]
pub struct MediatorHandle {
    local_addr: SocketAddr,
    registrations: Arc<RegistrationTable>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl MediatorHandle {
    /// Address peers connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live registration table
    pub fn registrations(&self) -> &Arc<RegistrationTable> {
        &self.registrations
    }

    /// Stop accepting, close every connection and wait for the server task
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.map_err(|e| TetherError::Io {
            message: format!("mediator task failed: {e}"),
        })?
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    reader: MessageReader,
    broker: Arc<RendezvousBroker>,
    registrations: Arc<RegistrationTable>,
) {
    let id = ConnectionId::next();
    let (mut read_half, write_half) = stream.into_split();
    let mut link = MediatorLink::new(id, peer, Box::new(write_half));
    tracing::debug!(connection = %id, peer = %peer, "Control connection accepted");

    loop {
        let message = match reader.read_from(&mut read_half).await {
            Ok(message) => message,
            Err(TetherError::ConnectionClosed) => break,
            Err(error) => {
                // Framing is lost once a message fails to parse
                tracing::warn!(connection = %id, peer = %peer, error = %error, "Dropping control connection");
                break;
            }
        };
        if let Err(error) = handle_message(&message, &mut link, &broker, &registrations).await {
            tracing::debug!(
                connection = %id,
                method = %message.method(),
                error = %error,
                "Request failed"
            );
        }
    }

    let removed = registrations.remove_connection(id);
    tracing::debug!(connection = %id, peer = %peer, removed = ?removed, "Control connection closed");
}

async fn handle_message(
    message: &Message,
    link: &mut MediatorLink,
    broker: &RendezvousBroker,
    registrations: &RegistrationTable,
) -> Result<()> {
    if message.class() != MessageClass::Request {
        tracing::debug!(class = ?message.class(), method = %message.method(), "Ignoring non-request message");
        return Ok(());
    }

    match message.method() {
        MessageMethod::Register => {
            let target = message.attribute::<Username>()?;
            if registrations.register(target.as_str(), link.peer_addr(), link.id()) {
                tracing::info!(target_id = %target.as_str(), endpoint = %link.peer_addr(), "Target registered");
            } else {
                tracing::trace!(target_id = %target.as_str(), "Registration refreshed");
            }
            Ok(())
        }
        MessageMethod::Deregister => {
            let target = message.attribute::<Username>()?;
            if registrations.deregister(target.as_str(), link.id()) {
                tracing::info!(target_id = %target.as_str(), "Target deregistered");
            } else {
                tracing::debug!(target_id = %target.as_str(), connection = %link.id(), "Deregistration of target not owned by connection ignored");
            }
            Ok(())
        }
        MessageMethod::ConnectionRequest => broker.dispatch(message, link).await,
    }
}
