use crate::broker::reject;
use crate::handler::{ConnectionRequestHandler, MediatorLink};
use crate::registrations::RegistrationTable;
use async_trait::async_trait;
use std::sync::Arc;
use tether_core::{ErrorCode, Message, Result, TechniqueCode, TetherError, Username, XorMappedAddress};

/// Answers direct connection requests with the target's registered endpoint
#[derive(Debug, Clone)]
pub struct DirectConnectionHandler {
    registrations: Arc<RegistrationTable>,
}

impl DirectConnectionHandler {
    pub fn new(registrations: Arc<RegistrationTable>) -> Self {
        Self { registrations }
    }
}

#[async_trait]
impl ConnectionRequestHandler for DirectConnectionHandler {
    fn technique(&self) -> TechniqueCode {
        TechniqueCode::DIRECT
    }

    fn name(&self) -> &str {
        "Directconnection"
    }

    async fn handle_connection_request(
        &self,
        request: &Message,
        link: &mut MediatorLink,
    ) -> Result<()> {
        let target = match request.attribute::<Username>() {
            Ok(target) => target,
            Err(error) => {
                reject(link, request, ErrorCode::BAD_REQUEST, "missing target id").await;
                return Err(error);
            }
        };

        let Some(endpoint) = self.registrations.lookup(target.as_str()) else {
            tracing::info!(target_id = %target.as_str(), source = %link.peer_addr(), "Requested target is not registered");
            reject(link, request, ErrorCode::NOT_FOUND, "target not registered").await;
            return Err(TetherError::TargetNotRegistered {
                target_id: target.0,
            });
        };

        tracing::info!(
            target_id = %target.as_str(),
            endpoint = %endpoint,
            source = %link.peer_addr(),
            "Forwarding target endpoint to source"
        );
        link.send(&request.success_response().with_attribute(XorMappedAddress(endpoint)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ConnectionId;
    use assert_matches::assert_matches;
    use std::net::SocketAddr;
    use tether_core::{MessageClass, MessageMethod, MessageReader};
    use tokio::io::duplex;

    fn request(target: &str) -> Message {
        Message::request(MessageMethod::ConnectionRequest)
            .with_attribute(Username::new(target))
            .with_attribute(TechniqueCode::DIRECT)
    }

    #[tokio::test]
    async fn test_registered_target_endpoint_is_returned() {
        let registrations = Arc::new(RegistrationTable::new());
        let endpoint: SocketAddr = "198.51.100.7:34567".parse().unwrap();
        registrations.register("peer-A", endpoint, ConnectionId::next());
        let handler = DirectConnectionHandler::new(registrations);

        let (ours, mut theirs) = duplex(4096);
        let mut link = MediatorLink::new(ConnectionId::next(), "192.0.2.9:1".parse().unwrap(), Box::new(ours));
        let request = request("peer-A");
        handler.handle_connection_request(&request, &mut link).await.unwrap();

        let response = MessageReader::default().read_from(&mut theirs).await.unwrap();
        assert!(response.is_response_to(&request));
        assert_eq!(response.class(), MessageClass::SuccessResponse);
        assert_eq!(response.attribute::<XorMappedAddress>().unwrap().endpoint(), endpoint);
    }

    #[tokio::test]
    async fn test_unregistered_target_is_not_found() {
        let handler = DirectConnectionHandler::new(Arc::new(RegistrationTable::new()));
        let (ours, mut theirs) = duplex(4096);
        let mut link = MediatorLink::new(ConnectionId::next(), "192.0.2.9:1".parse().unwrap(), Box::new(ours));

        let err = handler
            .handle_connection_request(&request("ghost"), &mut link)
            .await
            .unwrap_err();
        assert_matches!(err, TetherError::TargetNotRegistered { ref target_id } if target_id == "ghost");

        let response = MessageReader::default().read_from(&mut theirs).await.unwrap();
        let error = response.attribute::<ErrorCode>().unwrap();
        assert_eq!(error.code, ErrorCode::NOT_FOUND);
        assert_eq!(error.reason, "target not registered");
    }
}
