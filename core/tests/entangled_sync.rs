//! End-to-end subtree replication between a client and a server

use corvus_core::net::exelet::builtin::ServerState;
use corvus_core::net::exelet::ExeletRegistry;
use corvus_core::net::session::{self, InstanceFlavor, InstanceType, SessionIdentity};
use corvus_core::net::{Connection, ConnectionConfig, Payload};
use corvus_core::oid::Oid;
use corvus_core::outcome::Outcome;
use corvus_core::state::{Document, Value};
use corvus_core::store::{Group, User};
use corvus_core::sync::{Entangled, SyncDirection, SyncError};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    client: Arc<Connection>,
    _server: Arc<Connection>,
    state: Arc<ServerState>,
}

fn config() -> ConnectionConfig {
    ConnectionConfig {
        request_timeout: Duration::from_millis(1000),
        ..Default::default()
    }
}

async fn harness() -> Harness {
    let (client_io, server_io) = tokio::io::duplex(256 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let (server_read, server_write) = tokio::io::split(server_io);

    let state = ServerState::ephemeral();
    state.users.add(User::new("admin", "pass")).unwrap();

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
        SessionIdentity::new(InstanceType::Viewer, InstanceFlavor::Terminal),
        0,
        Arc::new(ExeletRegistry::new()),
        config(),
    );

    client.establish_session().await.unwrap();
    Harness {
        client,
        _server: server,
        state,
    }
}

async fn login(harness: &Harness) {
    let response = harness
        .client
        .request(Payload::RqLogin {
            username: "admin".into(),
            password: "pass".into(),
        })
        .await
        .unwrap();
    match response.payload {
        Payload::RsOutcome(Outcome { result: true, .. }) => {}
        other => panic!("login failed: {other:?}"),
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn remote_oid() -> Oid {
    // Document 2 under the server's root
    "21".parse().unwrap()
}

#[tokio::test]
async fn test_upstream_mirrors_client_mutations() {
    let harness = harness().await;
    login(&harness).await;

    let local = Document::root(2);
    let entangled = Entangled::entangle(
        local.clone(),
        Arc::clone(&harness.client),
        remote_oid(),
        SyncDirection::Upstream,
    )
    .await
    .unwrap();
    assert_eq!(harness.state.sync_count(), 1);

    local.attribute(5).set("mirrored");
    local.collection(3).document_by_key("member").attribute(7).set(42i64);

    let server_doc = harness.state.root.document_at(&remote_oid()).unwrap();
    wait_for(|| {
        server_doc
            .get_attribute(5)
            .and_then(|a| a.get())
            .map(|v| v.value)
            == Some(Value::Text("mirrored".into()))
    })
    .await;
    wait_for(|| server_doc.snapshot() == local.snapshot()).await;

    entangled.detach();
}

#[tokio::test]
async fn test_mutations_during_setup_are_not_lost() {
    let harness = harness().await;
    login(&harness).await;

    let local = Document::root(2);

    // Mutate continuously while the sync request is in flight; every write
    // must land in either the seed snapshot or the delta stream
    let mutator = {
        let local = local.clone();
        tokio::spawn(async move {
            for id in 1..=200u64 {
                local.attribute(id).set(id as i64);
                tokio::task::yield_now().await;
            }
        })
    };

    let entangled = Entangled::entangle(
        local.clone(),
        Arc::clone(&harness.client),
        remote_oid(),
        SyncDirection::Upstream,
    )
    .await
    .unwrap();
    mutator.await.unwrap();

    let server_doc = harness.state.root.document_at(&remote_oid()).unwrap();
    wait_for(|| server_doc.snapshot() == local.snapshot()).await;
    assert_eq!(
        server_doc.attributes().len(),
        200,
        "mutations made during setup were never replicated"
    );

    entangled.detach();
}

#[tokio::test]
async fn test_downstream_seeds_from_server() {
    let harness = harness().await;
    login(&harness).await;

    // Populate the server subtree before the client shows up
    let server_doc = harness.state.root.document_at(&remote_oid()).unwrap();
    server_doc.attribute(5).set("preexisting");

    let local = Document::root(2);
    let entangled = Entangled::entangle(
        local.clone(),
        Arc::clone(&harness.client),
        remote_oid(),
        SyncDirection::Downstream,
    )
    .await
    .unwrap();

    // The seed snapshot arrives with the sync response
    assert_eq!(
        local.attribute(5).get().map(|v| v.value),
        Some(Value::Text("preexisting".into()))
    );

    // Later server mutations stream through
    server_doc.attribute(6).set(true);
    wait_for(|| local.get_attribute(6).and_then(|a| a.get()).is_some()).await;

    // Client mutations do not flow upstream
    local.attribute(9).set("local only");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server_doc.get_attribute(9).is_none());

    entangled.detach();
}

#[tokio::test]
async fn test_bidirectional_converges_quietly() {
    let harness = harness().await;
    login(&harness).await;

    let local = Document::root(2);
    let entangled = Entangled::entangle(
        local.clone(),
        Arc::clone(&harness.client),
        remote_oid(),
        SyncDirection::Bidirectional,
    )
    .await
    .unwrap();

    let server_doc = harness.state.root.document_at(&remote_oid()).unwrap();
    local.attribute(5).set("from client");
    server_doc.attribute(6).set("from server");

    wait_for(|| local.snapshot() == server_doc.snapshot()).await;

    // Idempotent merges stop the echo: once converged, both sides go quiet
    let mut client_events = local.subscribe();
    let mut server_events = server_doc.subscribe();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(client_events.try_recv().is_err());
    assert!(server_events.try_recv().is_err());
    assert_eq!(local.snapshot(), server_doc.snapshot());

    entangled.detach();
}

#[tokio::test]
async fn test_auth_gating_around_login() {
    let harness = harness().await;

    // Unauth handlers answer before login
    let response = harness.client.request(Payload::RqPing).await.unwrap();
    assert!(matches!(response.payload, Payload::RsPing));

    // Auth-gated handlers drop silently before login, so the request
    // expires
    assert!(harness.client.request(Payload::RqListGroups).await.is_err());

    login(&harness).await;

    let group = Group::new("ops", "admin");
    let group_id = group.id.clone();
    let response = harness
        .client
        .request(Payload::RqAddGroup { group })
        .await
        .unwrap();
    assert!(matches!(
        response.payload,
        Payload::RsOutcome(Outcome { result: true, .. })
    ));

    let response = harness
        .client
        .request(Payload::RqListGroups)
        .await
        .unwrap();
    match response.payload {
        Payload::RsListGroups { groups } => {
            assert_eq!(groups.len(), 1);
            assert_eq!(groups[0].id, group_id);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    // Unauth handlers remain callable after login
    let response = harness.client.request(Payload::RqPing).await.unwrap();
    assert!(matches!(response.payload, Payload::RsPing));
}

#[tokio::test]
async fn test_sync_requires_login() {
    let harness = harness().await;

    let local = Document::root(2);
    let result = Entangled::entangle(
        local,
        Arc::clone(&harness.client),
        remote_oid(),
        SyncDirection::Upstream,
    )
    .await;

    // The gate drops the request silently, so the initiator times out
    assert!(matches!(result, Err(SyncError::Net(_))));
    assert_eq!(harness.state.sync_count(), 0);
}

#[tokio::test]
async fn test_detach_releases_subtree() {
    let harness = harness().await;
    login(&harness).await;

    let local = Document::root(2);
    let first = Entangled::entangle(
        local.clone(),
        Arc::clone(&harness.client),
        remote_oid(),
        SyncDirection::Upstream,
    )
    .await
    .unwrap();

    // The same local subtree cannot join a second entanglement
    assert!(matches!(
        Entangled::entangle(
            local.clone(),
            Arc::clone(&harness.client),
            "41".parse().unwrap(),
            SyncDirection::Upstream,
        )
        .await,
        Err(SyncError::AlreadyEntangled)
    ));

    first.detach();
    local.attribute(5).set("after detach");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let server_doc = harness.state.root.document_at(&remote_oid()).unwrap();
    assert!(server_doc.get_attribute(5).is_none());
}
