//! Direct technique against a running mediator

#![allow(clippy::unwrap_used)]

use assert_matches::assert_matches;
use std::time::Duration;
use tether_core::{TetherError, TraversalTechnique};
use tether_direct::{DirectConnection, NAME};
use tether_mediator::{MediatorConfig, MediatorHandle, MediatorServer};
use tether_transport::ControlChannelConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn mediator() -> MediatorHandle {
    MediatorServer::with_builtin_techniques(MediatorConfig::testing())
        .await
        .unwrap()
        .spawn()
        .unwrap()
}

fn direct() -> DirectConnection {
    DirectConnection::new(ControlChannelConfig::testing())
}

async fn wait_for_registration(mediator: &MediatorHandle, target_id: &str) {
    for _ in 0..200 {
        if mediator.registrations().lookup(target_id).is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{target_id} never registered");
}

#[tokio::test]
async fn test_peers_connect_through_mediator() {
    let mediator = mediator().await;
    let addr = mediator.local_addr();

    let mut target = direct();
    target.register_target_at_mediator("peer-A", addr).await.unwrap();
    wait_for_registration(&mediator, "peer-A").await;
    let accept = tokio::spawn(async move {
        let stream = target.create_target_side_connection("peer-A", addr).await;
        (target, stream)
    });

    // Let the target start listening before the source connects
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut source = direct();
    let mut outbound = source
        .create_source_side_connection("peer-A", addr)
        .await
        .unwrap();
    let (mut target, inbound) = accept.await.unwrap();
    let mut inbound = inbound.unwrap();

    assert_eq!(outbound.peer_addr().unwrap(), inbound.local_addr().unwrap());
    assert_eq!(inbound.peer_addr().unwrap(), outbound.local_addr().unwrap());
    assert_eq!(
        outbound.local_addr().unwrap().port(),
        source.control_channel().local_addr().unwrap().port()
    );
    assert_eq!(
        inbound.local_addr().unwrap().port(),
        target.control_channel().local_addr().unwrap().port()
    );

    outbound.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    inbound.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    target.deregister_target_at_mediator("peer-A", addr).await.unwrap();
    mediator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_target_fails_within_technique() {
    let mediator = mediator().await;

    let mut source = direct();
    let err = source
        .create_source_side_connection("nobody", mediator.local_addr())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        TetherError::ConnectionNotEstablished { ref technique, ref message }
            if technique == NAME && message.contains("target not registered")
    );

    mediator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_mediator_fails_registration() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut target = direct();
    let err = target
        .register_target_at_mediator("peer-A", addr)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        TetherError::RegistrationFailure { ref target_id, mediator, ref message }
            if target_id == "peer-A" && mediator == addr && message.starts_with("[Directconnection]")
    );

    let err = target
        .deregister_target_at_mediator("peer-A", addr)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        TetherError::RegistrationFailure { ref target_id, mediator, .. }
            if target_id == "peer-A" && mediator == addr
    );
}

#[tokio::test]
async fn test_fresh_instance_opens_its_own_control_connection() {
    let mediator = mediator().await;
    let addr = mediator.local_addr();

    let mut first = direct();
    first.register_target_at_mediator("peer-A", addr).await.unwrap();
    let mut second = first.fresh_instance();
    second.register_target_at_mediator("peer-B", addr).await.unwrap();

    wait_for_registration(&mediator, "peer-A").await;
    wait_for_registration(&mediator, "peer-B").await;
    assert_ne!(
        mediator.registrations().lookup("peer-A"),
        mediator.registrations().lookup("peer-B")
    );

    mediator.shutdown().await.unwrap();
}
