//! Dispatch of connection requests to technique handlers

use crate::handler::{ConnectionRequestHandler, MediatorLink};
use crate::registry::TechniqueRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tether_core::{ErrorCode, Message, Result, TechniqueCode, TetherError};

/// Routes each connection request to the handler named by its technique
/// attribute.
///
/// The broker answers under [`TechniqueCode::BROKER`] but never appears in the
/// registry it dispatches over.
#[derive(Debug, Clone)]
pub struct RendezvousBroker {
    registry: Arc<TechniqueRegistry>,
}

impl RendezvousBroker {
    /// Broker dispatching over `registry`
    pub fn new(registry: Arc<TechniqueRegistry>) -> Self {
        Self { registry }
    }

    /// Registry requests are dispatched over
    pub fn registry(&self) -> &TechniqueRegistry {
        &self.registry
    }

    /// Hand `request` to its technique's handler.
    ///
    /// Requests without a technique attribute, or naming an unknown or
    /// reserved technique, are answered with an error response on `link` and
    /// the failure is returned.
    pub async fn dispatch(&self, request: &Message, link: &mut MediatorLink) -> Result<()> {
        let code = match request.attribute::<TechniqueCode>() {
            Ok(code) => code,
            Err(error) => {
                tracing::error!(peer = %link.peer_addr(), "Connection request without traversal technique");
                reject(link, request, ErrorCode::BAD_REQUEST, "missing traversal technique").await;
                return Err(error);
            }
        };

        if code.is_reserved() {
            reject(link, request, ErrorCode::UNKNOWN_TECHNIQUE, "reserved traversal technique").await;
            return Err(TetherError::ReservedTechnique { code });
        }

        let handler = match self.registry.get(code) {
            Ok(handler) => handler,
            Err(error) => {
                tracing::warn!(code = %code, peer = %link.peer_addr(), "No handler for traversal technique");
                reject(link, request, ErrorCode::UNKNOWN_TECHNIQUE, "unknown traversal technique").await;
                return Err(error);
            }
        };

        tracing::debug!(code = %code, handler = handler.name(), peer = %link.peer_addr(), "Dispatching connection request");
        handler.handle_connection_request(request, link).await
    }
}

#[async_trait]
impl ConnectionRequestHandler for RendezvousBroker {
    fn technique(&self) -> TechniqueCode {
        TechniqueCode::BROKER
    }

    fn name(&self) -> &str {
        "Broker"
    }

    async fn handle_connection_request(
        &self,
        request: &Message,
        link: &mut MediatorLink,
    ) -> Result<()> {
        self.dispatch(request, link).await
    }
}

/// Send an error response, logging rather than returning a write failure
pub(crate) async fn reject(link: &mut MediatorLink, request: &Message, code: u16, reason: &str) {
    if let Err(error) = link.send(&request.error_response(code, reason)).await {
        tracing::warn!(peer = %link.peer_addr(), error = %error, "Could not deliver error response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ConnectionId;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use tether_core::{MessageClass, MessageMethod, MessageReader, Username};
    use tokio::io::{duplex, DuplexStream};

    /// Records the requests it receives
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl ConnectionRequestHandler for Recording {
        fn technique(&self) -> TechniqueCode {
            TechniqueCode::new(5)
        }

        fn name(&self) -> &str {
            "recording"
        }

        async fn handle_connection_request(
            &self,
            request: &Message,
            _link: &mut MediatorLink,
        ) -> Result<()> {
            self.seen.lock().push(request.clone());
            Ok(())
        }
    }

    fn broker_with(handler: Arc<Recording>) -> RendezvousBroker {
        let mut builder = TechniqueRegistry::builder();
        builder.register(handler).unwrap();
        RendezvousBroker::new(Arc::new(builder.build()))
    }

    fn link() -> (MediatorLink, DuplexStream) {
        let (ours, theirs) = duplex(4096);
        let peer = "192.0.2.1:5000".parse().unwrap();
        (MediatorLink::new(ConnectionId::next(), peer, Box::new(ours)), theirs)
    }

    fn request(code: Option<TechniqueCode>) -> Message {
        let mut message =
            Message::request(MessageMethod::ConnectionRequest).with_attribute(Username::new("peer-A"));
        if let Some(code) = code {
            message.add_attribute(code);
        }
        message
    }

    #[tokio::test]
    async fn test_request_reaches_matching_handler() {
        let handler = Arc::new(Recording::default());
        let broker = broker_with(handler.clone());
        let (mut link, _peer) = link();

        let request = request(Some(TechniqueCode::new(5)));
        broker.dispatch(&request, &mut link).await.unwrap();

        let seen = handler.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], request);
    }

    #[tokio::test]
    async fn test_unknown_technique_is_answered_with_error() {
        let handler = Arc::new(Recording::default());
        let broker = broker_with(handler.clone());
        let (mut link, mut peer) = link();

        let request = request(Some(TechniqueCode::new(6)));
        let err = broker.dispatch(&request, &mut link).await.unwrap_err();
        assert_matches!(err, TetherError::UnknownTechnique { .. });
        assert!(handler.seen.lock().is_empty());

        let response = MessageReader::default().read_from(&mut peer).await.unwrap();
        assert!(response.is_response_to(&request));
        assert_eq!(response.class(), MessageClass::ErrorResponse);
        assert_eq!(
            response.attribute::<ErrorCode>().unwrap().code,
            ErrorCode::UNKNOWN_TECHNIQUE
        );
    }

    #[tokio::test]
    async fn test_missing_technique_is_bad_request() {
        let broker = broker_with(Arc::new(Recording::default()));
        let (mut link, mut peer) = link();

        let request = request(None);
        let err = broker.dispatch(&request, &mut link).await.unwrap_err();
        assert_matches!(
            err,
            TetherError::MissingAttribute {
                attribute: "TRAVERSAL-TECHNIQUE",
                ..
            }
        );

        let response = MessageReader::default().read_from(&mut peer).await.unwrap();
        assert_eq!(
            response.attribute::<ErrorCode>().unwrap().code,
            ErrorCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_broker_code_is_not_dispatchable() {
        let broker = broker_with(Arc::new(Recording::default()));
        let (mut link, mut peer) = link();

        assert_eq!(broker.technique(), TechniqueCode::BROKER);
        assert!(!broker.registry().contains(TechniqueCode::BROKER));

        let err = broker
            .handle_connection_request(&request(Some(TechniqueCode::BROKER)), &mut link)
            .await
            .unwrap_err();
        assert_matches!(err, TetherError::ReservedTechnique { .. });

        let response = MessageReader::default().read_from(&mut peer).await.unwrap();
        assert_eq!(response.class(), MessageClass::ErrorResponse);
    }
}
