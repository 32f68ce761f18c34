//! Entangled subtree handles
//!
//! An [`Entangled`] handle owns the source and sink tasks replicating one
//! subtree over one connection. Dropping the handle stops replication and
//! releases the subtree for future entanglement. A subtree can be part of
//! at most one entanglement at a time; nesting is refused at setup.

use super::{Delta, SyncConfig, SyncDirection, SyncError};
use crate::net::{Connection, Payload};
use crate::oid::Oid;
use crate::state::{Collection, Document, Event, NodeSnapshot, StateError};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;

/// A subtree root that can take part in replication
pub trait Entangleable: Clone + Send + Sync + 'static {
    /// Absolute OID deltas are relativized against
    fn base_oid(&self) -> Oid;

    /// Event stream covering the whole subtree
    fn events(&self) -> broadcast::Receiver<Event>;

    /// Capture the subtree for seeding the remote side
    fn snapshot_node(&self) -> NodeSnapshot;

    /// Adopt a remote seed snapshot
    fn merge_node(&self, snapshot: &NodeSnapshot) -> Result<(), SyncError>;

    /// Apply one replicated mutation
    fn apply(&self, delta: &Delta) -> Result<(), StateError>;

    /// Flip the entanglement guard, returning the previous state
    fn mark_entangled(&self, on: bool) -> bool;
}

impl Entangleable for Document {
    fn base_oid(&self) -> Oid {
        self.oid()
    }

    fn events(&self) -> broadcast::Receiver<Event> {
        self.subscribe()
    }

    fn snapshot_node(&self) -> NodeSnapshot {
        NodeSnapshot::Document(self.snapshot())
    }

    fn merge_node(&self, snapshot: &NodeSnapshot) -> Result<(), SyncError> {
        match snapshot {
            NodeSnapshot::Document(snapshot) => Ok(self.merge(snapshot)?),
            NodeSnapshot::Collection(_) => Err(SyncError::SnapshotMismatch),
        }
    }

    fn apply(&self, delta: &Delta) -> Result<(), StateError> {
        delta.apply_to_document(self)
    }

    fn mark_entangled(&self, on: bool) -> bool {
        self.node().set_entangled(on)
    }
}

impl Entangleable for Collection {
    fn base_oid(&self) -> Oid {
        self.oid()
    }

    fn events(&self) -> broadcast::Receiver<Event> {
        self.subscribe()
    }

    fn snapshot_node(&self) -> NodeSnapshot {
        NodeSnapshot::Collection(self.snapshot())
    }

    fn merge_node(&self, snapshot: &NodeSnapshot) -> Result<(), SyncError> {
        match snapshot {
            NodeSnapshot::Collection(snapshot) => Ok(self.merge(snapshot)?),
            NodeSnapshot::Document(_) => Err(SyncError::SnapshotMismatch),
        }
    }

    fn apply(&self, delta: &Delta) -> Result<(), StateError> {
        delta.apply_to_collection(self)
    }

    fn mark_entangled(&self, on: bool) -> bool {
        self.node().set_entangled(on)
    }
}

/// A replicated subtree bound to one connection
pub struct Entangled<T: Entangleable> {
    base: T,
    connection: Arc<Connection>,
    sid: u64,
    source: Option<JoinHandle<()>>,
    sink: Option<JoinHandle<()>>,
}

pub type EntangledDocument = Entangled<Document>;
pub type EntangledCollection = Entangled<Collection>;

impl<T: Entangleable> Entangled<T> {
    /// Initiate replication of a local subtree with the peer's subtree at
    /// `remote_oid`. Seeds flow according to the direction before the
    /// delta stream starts.
    pub async fn entangle(
        base: T,
        connection: Arc<Connection>,
        remote_oid: Oid,
        direction: SyncDirection,
    ) -> Result<Self, SyncError> {
        if base.mark_entangled(true) {
            return Err(SyncError::AlreadyEntangled);
        }
        match Self::initiate(&base, &connection, remote_oid, direction).await {
            Ok(entangled) => Ok(entangled),
            Err(e) => {
                base.mark_entangled(false);
                Err(e)
            }
        }
    }

    async fn initiate(
        base: &T,
        connection: &Arc<Connection>,
        remote_oid: Oid,
        direction: SyncDirection,
    ) -> Result<Self, SyncError> {
        let config = SyncConfig {
            direction,
            initiator: true,
            sid: rand::random::<u64>(),
        };
        // Subscribe before the seed is captured so no mutation falls
        // between the snapshot and the delta stream; duplicates merge away
        let events = config.sources().then(|| base.events());
        let seed = config.sources().then(|| base.snapshot_node());
        // The sink registers before the request so no delta can slip past
        let sink_rx = config.sinks().then(|| connection.register_sink(config.sid));

        let setup: Result<(), SyncError> = async {
            let response = connection
                .request(Payload::RqSync {
                    oid: remote_oid,
                    direction,
                    sid: config.sid,
                    snapshot: seed,
                })
                .await?;
            match response.payload {
                Payload::RsSync { snapshot } => {
                    if let Some(snapshot) = &snapshot {
                        base.merge_node(snapshot)?;
                    }
                    Ok(())
                }
                Payload::RsOutcome(outcome) if !outcome.result => {
                    Err(SyncError::Refused(outcome.error))
                }
                _ => Err(SyncError::Refused(None)),
            }
        }
        .await;
        if let Err(e) = setup {
            connection.remove_sink(config.sid);
            return Err(e);
        }

        Ok(Self::spawn_roles(
            base.clone(),
            Arc::clone(connection),
            config,
            events,
            sink_rx,
        ))
    }

    /// Accept replication on the responding side of an established sync
    /// request.
    pub fn attach(
        base: T,
        connection: Arc<Connection>,
        direction: SyncDirection,
        sid: u64,
    ) -> Result<Self, SyncError> {
        if base.mark_entangled(true) {
            return Err(SyncError::AlreadyEntangled);
        }
        let config = SyncConfig {
            direction,
            initiator: false,
            sid,
        };
        let events = config.sources().then(|| base.events());
        let sink_rx = config.sinks().then(|| connection.register_sink(sid));
        Ok(Self::spawn_roles(base, connection, config, events, sink_rx))
    }

    fn spawn_roles(
        base: T,
        connection: Arc<Connection>,
        config: SyncConfig,
        events: Option<broadcast::Receiver<Event>>,
        sink_rx: Option<mpsc::Receiver<Delta>>,
    ) -> Self {
        let sid = config.sid;
        let source_task = events.map(|mut events| {
            let connection = Arc::clone(&connection);
            let base_oid = base.base_oid();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => {
                            if let Some(delta) = Delta::from_event(&event, &base_oid) {
                                if connection.send_event(delta.into_payload(sid)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(sid, skipped, "event stream lagged, mutations were not replicated");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        });

        let sink_task = sink_rx.map(|mut sink_rx| {
            let base = base.clone();
            tokio::spawn(async move {
                while let Some(delta) = sink_rx.recv().await {
                    if let Err(e) = base.apply(&delta) {
                        warn!(sid, error = %e, "failed to apply replicated mutation");
                    }
                }
            })
        });

        Self {
            base,
            connection,
            sid,
            source: source_task,
            sink: sink_task,
        }
    }

    /// The stream id this entanglement is bound to
    pub fn sid(&self) -> u64 {
        self.sid
    }

    /// Stop replication and release the subtree
    pub fn detach(self) {}
}

impl<T: Entangleable> Deref for Entangled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.base
    }
}

impl<T: Entangleable> Drop for Entangled<T> {
    fn drop(&mut self) {
        if let Some(task) = self.source.take() {
            task.abort();
        }
        if let Some(task) = self.sink.take() {
            task.abort();
        }
        self.connection.remove_sink(self.sid);
        self.base.mark_entangled(false);
    }
}

/// Either kind of live entanglement, as retained by a responder
pub enum Entanglement {
    Document(EntangledDocument),
    Collection(EntangledCollection),
}

impl Entanglement {
    pub fn sid(&self) -> u64 {
        match self {
            Entanglement::Document(e) => e.sid(),
            Entanglement::Collection(e) => e.sid(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::exelet::ExeletRegistry;
    use crate::net::session::{generate_cvid, InstanceFlavor, InstanceType, SessionIdentity};
    use crate::net::ConnectionConfig;

    fn connection() -> Arc<Connection> {
        let (io, _peer) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(io);
        Connection::spawn(
            read,
            write,
            SessionIdentity::new(InstanceType::Server, InstanceFlavor::Vanilla),
            generate_cvid(InstanceType::Server, InstanceFlavor::Vanilla),
            Arc::new(ExeletRegistry::new()),
            ConnectionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_nested_entanglement_refused() {
        let conn = connection();
        let doc = Document::root(1);

        let first =
            Entangled::attach(doc.clone(), Arc::clone(&conn), SyncDirection::Bidirectional, 1)
                .unwrap();
        assert!(matches!(
            Entangled::attach(doc.clone(), Arc::clone(&conn), SyncDirection::Bidirectional, 2),
            Err(SyncError::AlreadyEntangled)
        ));

        first.detach();
        assert!(
            Entangled::attach(doc, conn, SyncDirection::Bidirectional, 3).is_ok()
        );
    }

    #[tokio::test]
    async fn test_snapshot_kind_mismatch() {
        let doc = Document::root(1);
        let wrong = NodeSnapshot::Collection(Collection::root(1).snapshot());
        assert!(matches!(
            doc.merge_node(&wrong),
            Err(SyncError::SnapshotMismatch)
        ));
    }
}
