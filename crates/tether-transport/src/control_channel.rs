//! Peer-side control channel to the mediator
//!
//! The channel connects lazily, exactly once, and never reconnects. Its local
//! port is the anchor the direct technique reuses: the target listens on it and
//! the source connects out from it.

use crate::config::ControlChannelConfig;
use crate::keep_alive::{registration_message, send_shared, KeepAliveFailure, KeepAliveTask, SharedWriter};
use crate::socket;
use std::net::SocketAddr;
use std::sync::Arc;
use tether_core::{
    ErrorCode, Message, MessageClass, MessageMethod, MessageReader, Result, TechniqueCode,
    TetherError, Username, XorMappedAddress,
};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{timeout, timeout_at, Instant};

const FAILURE_CHANNEL_CAPACITY: usize = 16;

struct Connection {
    reader: OwnedReadHalf,
    writer: SharedWriter,
    local_addr: SocketAddr,
    mediator: SocketAddr,
}

enum ChannelState {
    Unconnected,
    Connected(Connection),
}

/// A peer's persistent, lazily connected link to the mediator
pub struct ControlChannel {
    technique: String,
    config: ControlChannelConfig,
    reader: MessageReader,
    state: ChannelState,
    keep_alive: Option<KeepAliveTask>,
    failures: broadcast::Sender<KeepAliveFailure>,
}

impl ControlChannel {
    /// Unconnected channel; `technique` names the owner in error context and logs
    pub fn new(technique: impl Into<String>, config: ControlChannelConfig) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            technique: technique.into(),
            reader: MessageReader::new(config.max_message_size),
            config,
            state: ChannelState::Unconnected,
            keep_alive: None,
            failures,
        }
    }

    /// Channel configuration
    pub fn config(&self) -> &ControlChannelConfig {
        &self.config
    }

    /// Whether the control connection has been established
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ChannelState::Connected(_))
    }

    /// Local address of the control connection
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.connection()?.local_addr)
    }

    /// Mediator the channel is connected to
    pub fn mediator(&self) -> Option<SocketAddr> {
        match &self.state {
            ChannelState::Connected(connection) => Some(connection.mediator),
            ChannelState::Unconnected => None,
        }
    }

    /// Whether a keep-alive task is currently refreshing a registration
    pub fn keep_alive_active(&self) -> bool {
        self.keep_alive
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Subscribe to keep-alive failures of this channel.
    ///
    /// Without a subscriber a failed keep-alive only stops refreshing.
    pub fn keep_alive_failures(&self) -> broadcast::Receiver<KeepAliveFailure> {
        self.failures.subscribe()
    }

    /// Connect to `mediator` unless already connected
    pub async fn connect(&mut self, mediator: SocketAddr) -> Result<()> {
        if let ChannelState::Connected(connection) = &self.state {
            if connection.mediator != mediator {
                tracing::debug!(
                    connected = %connection.mediator,
                    requested = %mediator,
                    "Control connection already established to another mediator"
                );
            }
            return Ok(());
        }

        let local = socket::wildcard(mediator, self.config.local_port);
        let stream = match self.open_control_stream(local, mediator).await {
            Ok(stream) => stream,
            Err(message) => {
                tracing::error!(
                    mediator = %mediator,
                    technique = %self.technique,
                    "Control connection could not be established: {}",
                    message
                );
                return Err(TetherError::connection_not_established(
                    &self.technique,
                    format!("control connection to {mediator}: {message}"),
                ));
            }
        };

        let local_addr = stream.local_addr()?;
        let (reader, writer) = stream.into_split();
        tracing::info!(mediator = %mediator, local = %local_addr, "Control connection established");
        self.state = ChannelState::Connected(Connection {
            reader,
            writer: Arc::new(Mutex::new(Box::new(writer))),
            local_addr,
            mediator,
        });
        Ok(())
    }

    async fn open_control_stream(
        &self,
        local: SocketAddr,
        mediator: SocketAddr,
    ) -> std::result::Result<TcpStream, String> {
        let socket = socket::bound_socket(local).map_err(|e| format!("bind {local}: {e}"))?;
        match timeout(self.config.connect_timeout(), socket.connect(mediator)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {}ms",
                self.config.connect_timeout_ms
            )),
        }
    }

    /// Register `target_id` and start refreshing it
    pub async fn register(&mut self, target_id: &str, mediator: SocketAddr) -> Result<()> {
        let result = self.send_registration(target_id, mediator).await;
        if let Err(error) = result {
            tracing::error!(target_id = %target_id, mediator = %mediator, "Target could not be registered");
            return Err(TetherError::registration_failure(
                target_id,
                mediator,
                error.to_string(),
            ));
        }
        // TODO: wait for the mediator's success response once it acknowledges REGISTER
        self.start_keep_alive(target_id);
        tracing::info!(target_id = %target_id, mediator = %mediator, "Target registered");
        Ok(())
    }

    async fn send_registration(&mut self, target_id: &str, mediator: SocketAddr) -> Result<()> {
        self.connect(mediator).await?;
        self.send(&registration_message(target_id)).await
    }

    fn start_keep_alive(&mut self, target_id: &str) {
        let writer = match &self.state {
            ChannelState::Connected(connection) => connection.writer.clone(),
            ChannelState::Unconnected => return,
        };
        tracing::info!(
            target_id = %target_id,
            technique = %self.technique,
            period_ms = self.config.keep_alive_interval_ms,
            "Starting keep-alive"
        );
        // Replacing the handle drops (and so cancels) any previous task
        self.keep_alive = Some(KeepAliveTask::spawn(
            target_id,
            writer,
            self.config.keep_alive_interval(),
            self.failures.clone(),
        ));
    }

    /// Stop refreshing and remove the registration of `target_id`
    pub async fn deregister(&mut self, target_id: &str, mediator: SocketAddr) -> Result<()> {
        self.stop_keep_alive();
        let message =
            Message::request(MessageMethod::Deregister).with_attribute(Username::new(target_id));
        let result = async {
            self.connect(mediator).await?;
            self.send(&message).await
        }
        .await;

        result.map_err(|error| {
            tracing::error!(target_id = %target_id, error = %error, "Exception while deregistering target");
            TetherError::registration_failure(target_id, mediator, error.to_string())
        })?;
        tracing::info!(target_id = %target_id, mediator = %mediator, "Target deregistered");
        Ok(())
    }

    fn stop_keep_alive(&mut self) {
        if let Some(mut task) = self.keep_alive.take() {
            task.cancel();
        }
    }

    /// Ask the mediator for the endpoint of `target_id` using `technique`.
    ///
    /// Waits for the response carrying this request's transaction id, bounded
    /// by the response timeout. Late answers to earlier, timed-out requests
    /// are discarded.
    pub async fn request_connection(
        &mut self,
        target_id: &str,
        technique: TechniqueCode,
    ) -> Result<SocketAddr> {
        let request = Message::request(MessageMethod::ConnectionRequest)
            .with_attribute(Username::new(target_id))
            .with_attribute(technique);
        self.send(&request).await?;

        let reader = self.reader;
        let deadline = Instant::now() + self.config.response_timeout();
        let connection = self.connection_mut()?;
        let response = loop {
            let message = timeout_at(deadline, reader.read_from(&mut connection.reader))
                .await
                .map_err(|_| TetherError::timeout(format!("connection request for {target_id}")))??;
            if message.transaction_id() == request.transaction_id() {
                break message;
            }
            tracing::debug!(
                class = ?message.class(),
                method = %message.method(),
                "Discarding message for another transaction"
            );
        };

        if !response.is_response_to(&request) {
            return Err(TetherError::malformed(format!(
                "expected response to {}, got {:?} {}",
                request.method(),
                response.class(),
                response.method()
            )));
        }

        if response.class() == MessageClass::ErrorResponse {
            let error = response.attribute::<ErrorCode>()?;
            return Err(TetherError::RequestRejected {
                code: error.code,
                reason: error.reason,
            });
        }

        let endpoint = response.attribute::<XorMappedAddress>()?.endpoint();
        tracing::debug!(target_id = %target_id, endpoint = %endpoint, "Mediator returned target endpoint");
        Ok(endpoint)
    }

    /// Wait for one inbound connection on the control connection's local port
    pub async fn accept_incoming_connection(&self) -> Result<TcpStream> {
        let local_addr = self.local_addr()?;
        let bind_addr = socket::wildcard(local_addr, local_addr.port());
        let listener = socket::shared_listener(bind_addr, 1).map_err(|e| {
            TetherError::connection_not_established(&self.technique, format!("listen on {bind_addr}: {e}"))
        })?;
        tracing::info!("Waiting for incoming connections on {}", bind_addr);

        let (stream, peer) = timeout(self.config.accept_timeout(), listener.accept())
            .await
            .map_err(|_| {
                TetherError::connection_not_established(
                    &self.technique,
                    format!("no inbound connection within {}ms", self.config.accept_timeout_ms),
                )
            })?
            .map_err(|e| TetherError::connection_not_established(&self.technique, format!("accept: {e}")))?;
        tracing::info!(peer = %peer, "Accepted inbound connection");
        Ok(stream)
    }

    /// Connect to `endpoint` from the control connection's local port
    pub async fn create_outgoing_connection(&self, endpoint: SocketAddr) -> Result<TcpStream> {
        let local_addr = self.local_addr()?;
        let bind_addr = socket::wildcard(endpoint, local_addr.port());
        tracing::debug!("Connecting to target {}", endpoint);

        let socket = socket::bound_socket(bind_addr).map_err(|e| {
            TetherError::connection_not_established(&self.technique, format!("bind {bind_addr}: {e}"))
        })?;
        let stream = timeout(self.config.connect_timeout(), socket.connect(endpoint))
            .await
            .map_err(|_| {
                TetherError::connection_not_established(
                    &self.technique,
                    format!("connect to {endpoint} timed out"),
                )
            })?
            .map_err(|e| {
                TetherError::connection_not_established(&self.technique, format!("connect to {endpoint}: {e}"))
            })?;
        Ok(stream)
    }

    /// Stop the keep-alive and drop the control connection
    pub fn close(mut self) {
        self.stop_keep_alive();
        if let Some(mediator) = self.mediator() {
            tracing::debug!(mediator = %mediator, "Control connection closed");
        }
    }

    async fn send(&self, message: &Message) -> Result<()> {
        send_shared(&self.connection()?.writer, message).await
    }

    fn connection(&self) -> Result<&Connection> {
        match &self.state {
            ChannelState::Connected(connection) => Ok(connection),
            ChannelState::Unconnected => Err(self.not_connected()),
        }
    }

    fn connection_mut(&mut self) -> Result<&mut Connection> {
        match &mut self.state {
            ChannelState::Connected(connection) => Ok(connection),
            ChannelState::Unconnected => Err(TetherError::connection_not_established(
                &self.technique,
                "control connection not established",
            )),
        }
    }

    fn not_connected(&self) -> TetherError {
        TetherError::connection_not_established(&self.technique, "control connection not established")
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("technique", &self.technique)
            .field("mediator", &self.mediator())
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}
