//! Session handshake behavior over an in-memory transport

use corvus_core::net::exelet::builtin::ServerState;
use corvus_core::net::exelet::ExeletRegistry;
use corvus_core::net::session::{self, InstanceFlavor, InstanceType, SessionIdentity};
use corvus_core::net::{Connection, ConnectionConfig, Payload};
use std::sync::Arc;
use std::time::Duration;

fn config() -> ConnectionConfig {
    ConnectionConfig {
        request_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

fn spawn_pair(client_identity: SessionIdentity) -> (Arc<Connection>, Arc<Connection>) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let (server_read, server_write) = tokio::io::split(server_io);

    let state = ServerState::ephemeral();
    let registry = Arc::new(ExeletRegistry::new());
    state.register_builtins(&registry).unwrap();

    let server = Connection::spawn(
        server_read,
        server_write,
        SessionIdentity::new(InstanceType::Server, InstanceFlavor::Vanilla),
        session::generate_cvid(InstanceType::Server, InstanceFlavor::Vanilla),
        registry,
        config(),
    );
    let client = Connection::spawn(
        client_read,
        client_write,
        client_identity,
        0,
        Arc::new(ExeletRegistry::new()),
        config(),
    );
    (client, server)
}

#[tokio::test]
async fn test_handshake_populates_both_sides() {
    let identity = SessionIdentity::new(InstanceType::Agent, InstanceFlavor::Native);
    let (client, server) = spawn_pair(identity.clone());

    let cvid = client.establish_session().await.unwrap();

    assert!(cvid > 0);
    assert_eq!(client.local_cvid(), cvid);
    assert_eq!(session::extract_instance(cvid), Some(InstanceType::Agent));
    assert_eq!(session::extract_flavor(cvid), Some(InstanceFlavor::Native));

    assert_eq!(client.peer_cvid(), server.local_cvid());
    assert_eq!(server.peer_cvid(), cvid);
    assert_eq!(server.peer_uuid().as_deref(), Some(identity.uuid.as_str()));
    assert_eq!(server.peer_instance(), Some(InstanceType::Agent));
}

#[tokio::test]
async fn test_empty_uuid_refused() {
    let mut identity = SessionIdentity::new(InstanceType::Agent, InstanceFlavor::Vanilla);
    identity.uuid = String::new();
    let (client, _server) = spawn_pair(identity);

    assert!(client.establish_session().await.is_err());
    assert_eq!(client.local_cvid(), 0);
}

#[tokio::test]
async fn test_server_instance_refused() {
    let identity = SessionIdentity::new(InstanceType::Server, InstanceFlavor::Vanilla);
    let (client, _server) = spawn_pair(identity);

    assert!(client.establish_session().await.is_err());
}

#[tokio::test]
async fn test_unknown_classification_refused() {
    let (client, _server) =
        spawn_pair(SessionIdentity::new(InstanceType::Viewer, InstanceFlavor::Web));

    let result = client
        .request(Payload::RqSession {
            instance: 99,
            flavor: 1,
            uuid: "u".into(),
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_session_handler_is_single_use() {
    let identity = SessionIdentity::new(InstanceType::Viewer, InstanceFlavor::Desktop);
    let (client, server) = spawn_pair(identity);

    let first = client.establish_session().await.unwrap();

    // The responder has removed itself; the repeat request is dropped and
    // the peer identity stays fixed
    assert!(client.establish_session().await.is_err());
    assert_eq!(server.peer_cvid(), first);
}
