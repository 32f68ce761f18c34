//! Envelope-pumping connections
//!
//! A [`Connection`] wraps one byte stream with a reader task and a writer
//! task. Outbound requests register a oneshot waiter keyed by envelope id;
//! the reader resolves waiters for response payloads, answers the session
//! handshake inline, routes replication deltas to their registered sinks,
//! and hands all remaining traffic to the exelet dispatcher.

use super::codec;
use super::exelet::ExeletRegistry;
use super::message::{Envelope, Payload};
use super::session::{self, InstanceType, SessionIdentity};
use super::NetError;
use crate::sync::Delta;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

/// Connection tuning knobs
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long a request waits for its response
    pub request_timeout: Duration,
    /// Outbound envelope queue depth
    pub outbound_capacity: usize,
    /// Per-stream delta sink queue depth
    pub sink_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            outbound_capacity: 128,
            sink_capacity: 256,
        }
    }
}

/// One live peer connection
pub struct Connection {
    config: ConnectionConfig,
    identity: SessionIdentity,
    local_cvid: AtomicI32,
    peer_cvid: AtomicI32,
    peer_uuid: Mutex<Option<String>>,
    username: Mutex<Option<String>>,
    authenticated: AtomicBool,
    permissions: Mutex<HashSet<String>>,
    session_handled: AtomicBool,
    next_id: AtomicU64,
    outbound: mpsc::Sender<Envelope>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Envelope>>>,
    sinks: Mutex<HashMap<u64, mpsc::Sender<Delta>>>,
    shutdown: watch::Sender<bool>,
}

impl Connection {
    /// Start the reader and writer tasks over a split transport.
    ///
    /// Servers pass their own CVID; requesters pass zero and receive one
    /// from [`Connection::establish_session`].
    pub fn spawn<R, W>(
        reader: R,
        writer: W,
        identity: SessionIdentity,
        local_cvid: i32,
        registry: Arc<ExeletRegistry>,
        config: ConnectionConfig,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, mut outbound_rx) = mpsc::channel(config.outbound_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connection = Arc::new(Self {
            config,
            identity,
            local_cvid: AtomicI32::new(local_cvid),
            peer_cvid: AtomicI32::new(0),
            peer_uuid: Mutex::new(None),
            username: Mutex::new(None),
            authenticated: AtomicBool::new(false),
            permissions: Mutex::new(HashSet::new()),
            session_handled: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            outbound: outbound_tx,
            pending: Mutex::new(HashMap::new()),
            sinks: Mutex::new(HashMap::new()),
            shutdown: shutdown_tx,
        });

        let mut writer_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut writer = writer;
            loop {
                tokio::select! {
                    _ = writer_shutdown.changed() => break,
                    envelope = outbound_rx.recv() => match envelope {
                        Some(envelope) => {
                            if let Err(e) = codec::write_frame(&mut writer, &envelope).await {
                                debug!(error = %e, "write failed");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let conn = Arc::clone(&connection);
        let mut reader_shutdown = shutdown_rx;
        tokio::spawn(async move {
            let mut reader = reader;
            loop {
                let envelope = tokio::select! {
                    _ = reader_shutdown.changed() => break,
                    result = codec::read_frame(&mut reader) => match result {
                        Ok(envelope) => envelope,
                        Err(NetError::Closed) => break,
                        Err(e) => {
                            debug!(error = %e, "read failed");
                            break;
                        }
                    },
                };
                conn.route(envelope, &registry).await;
            }
            conn.close();
        });

        connection
    }

    async fn route(self: &Arc<Self>, envelope: Envelope, registry: &Arc<ExeletRegistry>) {
        // Responses resolve their waiting request first
        if envelope.payload.kind().is_response() {
            let waiter = self.pending.lock().remove(&envelope.id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(envelope);
                }
                None => trace!(id = envelope.id, "response with no waiting request"),
            }
            return;
        }

        // The session handshake is answered before the dispatcher sees
        // anything
        if let Payload::RqSession {
            instance,
            flavor,
            uuid,
        } = &envelope.payload
        {
            if self.identity.instance == InstanceType::Server {
                let uuid = uuid.clone();
                let (instance, flavor) = (*instance, *flavor);
                self.handle_session_request(&envelope, instance, flavor, uuid)
                    .await;
            } else {
                trace!("session request on a non-server endpoint dropped");
            }
            return;
        }

        // Replication deltas bypass the dispatcher
        if let Payload::EvDelta { sid, delta } = envelope.payload {
            let sink = self.sinks.lock().get(&sid).cloned();
            match sink {
                Some(sink) => {
                    if sink.send(delta).await.is_err() {
                        self.sinks.lock().remove(&sid);
                    }
                }
                None => trace!(sid, "delta for unknown stream dropped"),
            }
            return;
        }

        registry.dispatch(Arc::clone(self), envelope);
    }

    /// Answer one session request. The handler is single-use: later
    /// requests on the same connection are dropped.
    async fn handle_session_request(
        &self,
        request: &Envelope,
        instance: i32,
        flavor: i32,
        uuid: String,
    ) {
        if self.session_handled.swap(true, Ordering::SeqCst) {
            trace!("duplicate session request dropped");
            return;
        }
        match session::validate_request(instance, flavor, &uuid) {
            Ok((instance, flavor)) => {
                let cvid = session::generate_cvid(instance, flavor);
                self.peer_cvid.store(cvid, Ordering::SeqCst);
                *self.peer_uuid.lock() = Some(uuid);
                debug!(cvid, "session established");
                let response = Envelope::rs(
                    request,
                    Payload::RsSession {
                        cvid,
                        server_cvid: self.local_cvid(),
                        server_uuid: self.identity.uuid.clone(),
                    },
                );
                if self.send(response).await.is_err() {
                    self.close();
                }
            }
            Err(e) => {
                warn!(error = %e, "session request refused");
                self.close();
            }
        }
    }

    /// Request a session id from the server side of this connection
    pub async fn establish_session(&self) -> Result<i32, NetError> {
        let response = self
            .request(Payload::RqSession {
                instance: self.identity.instance as i32,
                flavor: self.identity.flavor as i32,
                uuid: self.identity.uuid.clone(),
            })
            .await?;
        match response.payload {
            Payload::RsSession {
                cvid,
                server_cvid,
                server_uuid,
            } => {
                session::validate_response(cvid, server_cvid, &server_uuid)?;
                self.local_cvid.store(cvid, Ordering::SeqCst);
                self.peer_cvid.store(server_cvid, Ordering::SeqCst);
                *self.peer_uuid.lock() = Some(server_uuid);
                debug!(cvid, "session established");
                Ok(cvid)
            }
            _ => Err(NetError::UnexpectedResponse),
        }
    }

    /// Send a request and wait for its correlated response
    pub async fn request(&self, payload: Payload) -> Result<Envelope, NetError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let mut envelope = Envelope::rq(id, payload);
        let from = self.local_cvid();
        if from > 0 {
            envelope.from = Some(from);
        }
        let to = self.peer_cvid();
        if to > 0 {
            envelope.to = Some(to);
        }

        if self.outbound.send(envelope).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(NetError::Closed);
        }
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(NetError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(NetError::Timeout)
            }
        }
    }

    /// Queue an envelope for the writer task
    pub async fn send(&self, envelope: Envelope) -> Result<(), NetError> {
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| NetError::Closed)
    }

    /// Send a one-way event
    pub async fn send_event(&self, payload: Payload) -> Result<(), NetError> {
        self.send(Envelope::ev(payload)).await
    }

    /// Answer a request
    pub async fn reply(&self, request: &Envelope, payload: Payload) -> Result<(), NetError> {
        self.send(Envelope::rs(request, payload)).await
    }

    /// Stop both pump tasks. Waiting requests observe `Closed`.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
        self.pending.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Our CVID, or zero before the handshake assigns one
    pub fn local_cvid(&self) -> i32 {
        self.local_cvid.load(Ordering::SeqCst)
    }

    /// The peer's CVID, or zero before the handshake
    pub fn peer_cvid(&self) -> i32 {
        self.peer_cvid.load(Ordering::SeqCst)
    }

    pub fn peer_uuid(&self) -> Option<String> {
        self.peer_uuid.lock().clone()
    }

    /// The peer's instance type, recovered from its CVID
    pub fn peer_instance(&self) -> Option<InstanceType> {
        session::extract_instance(self.peer_cvid())
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn set_authenticated(&self, on: bool) {
        self.authenticated.store(on, Ordering::SeqCst);
    }

    pub fn set_username(&self, username: String) {
        *self.username.lock() = Some(username);
    }

    pub fn username(&self) -> Option<String> {
        self.username.lock().clone()
    }

    pub fn grant_permissions(&self, permissions: impl IntoIterator<Item = String>) {
        self.permissions.lock().extend(permissions);
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.lock().contains(permission)
    }

    pub fn clear_permissions(&self) {
        self.permissions.lock().clear();
    }

    /// Register a delta sink for a sync stream
    pub fn register_sink(&self, sid: u64) -> mpsc::Receiver<Delta> {
        let (tx, rx) = mpsc::channel(self.config.sink_capacity);
        self.sinks.lock().insert(sid, tx);
        rx
    }

    pub fn remove_sink(&self, sid: u64) {
        self.sinks.lock().remove(&sid);
    }
}

/// Connection lifecycle announcements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(i32),
    Disconnected(i32),
}

/// All live connections, keyed by peer CVID
pub struct ConnectionStore {
    connections: RwLock<HashMap<i32, Arc<Connection>>>,
    bus: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionStore {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(64);
        Self {
            connections: RwLock::new(HashMap::new()),
            bus,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.bus.subscribe()
    }

    pub fn add(&self, cvid: i32, connection: Arc<Connection>) {
        self.connections.write().insert(cvid, connection);
        let _ = self.bus.send(ConnectionEvent::Connected(cvid));
    }

    pub fn get(&self, cvid: i32) -> Option<Arc<Connection>> {
        self.connections.read().get(&cvid).cloned()
    }

    pub fn remove(&self, cvid: i32) -> Option<Arc<Connection>> {
        let removed = self.connections.write().remove(&cvid);
        if removed.is_some() {
            let _ = self.bus.send(ConnectionEvent::Disconnected(cvid));
        }
        removed
    }

    pub fn list(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }
}

impl Default for ConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::session::{InstanceFlavor, InstanceType};

    fn pair(
        config: ConnectionConfig,
    ) -> (Arc<Connection>, Arc<Connection>) {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);

        let registry = Arc::new(ExeletRegistry::new());
        let server = Connection::spawn(
            server_read,
            server_write,
            SessionIdentity::new(InstanceType::Server, InstanceFlavor::Vanilla),
            session::generate_cvid(InstanceType::Server, InstanceFlavor::Vanilla),
            Arc::clone(&registry),
            config.clone(),
        );
        let client = Connection::spawn(
            client_read,
            client_write,
            SessionIdentity::new(InstanceType::Viewer, InstanceFlavor::Terminal),
            0,
            registry,
            config,
        );
        (client, server)
    }

    #[tokio::test]
    async fn test_session_assignment() {
        let (client, server) = pair(ConnectionConfig::default());

        let cvid = client.establish_session().await.unwrap();
        assert!(cvid > 0);
        assert_eq!(client.local_cvid(), cvid);
        assert_eq!(client.peer_cvid(), server.local_cvid());
        assert_eq!(
            session::extract_instance(cvid),
            Some(InstanceType::Viewer)
        );
        assert_eq!(server.peer_cvid(), cvid);
        assert_eq!(
            server.peer_uuid().as_deref(),
            Some(client.identity().uuid.as_str())
        );
    }

    #[tokio::test]
    async fn test_unhandled_request_times_out() {
        let config = ConnectionConfig {
            request_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let (client, _server) = pair(config);

        // No ping handler registered anywhere, so the request expires
        assert!(matches!(
            client.request(Payload::RqPing).await,
            Err(NetError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_connection_store_tracks_lifecycle() {
        let (client, _server) = pair(ConnectionConfig::default());
        let store = ConnectionStore::new();
        let mut events = store.subscribe();

        store.add(42, Arc::clone(&client));
        assert!(store.get(42).is_some());
        assert_eq!(store.count(), 1);
        assert_eq!(events.try_recv().unwrap(), ConnectionEvent::Connected(42));

        assert!(store.remove(42).is_some());
        assert!(store.get(42).is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            ConnectionEvent::Disconnected(42)
        );
        // Removing an absent entry announces nothing
        assert!(store.remove(42).is_none());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_after_close_fails() {
        let config = ConnectionConfig {
            request_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let (client, _server) = pair(config);
        client.close();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.request(Payload::RqPing).await.is_err());
    }
}
