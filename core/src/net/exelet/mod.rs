//! Message handler registration and dispatch
//!
//! Handlers are registered in named groups, keyed by the payload kind they
//! answer. Each handler carries a gate deciding who may invoke it; a gated
//! or unknown payload is dropped without a response, so probing reveals
//! nothing. Handlers run on their own task and any value they return is
//! sent back as the response.

pub mod builtin;

use super::connection::Connection;
use super::message::{Envelope, Payload, PayloadKind};
use super::NetError;
use crate::outcome::{ErrorCode, Outcome};
use crate::state::StateError;
use crate::store::StoreError;
use crate::sync::SyncError;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Handler registration failures, raised at startup
#[derive(Debug, Error)]
pub enum ExeletError {
    #[error("A handler for {0} is already registered")]
    DuplicateHandler(&'static str),
    #[error("An exelet group named {0} is already registered")]
    DuplicateGroup(&'static str),
}

/// Handler execution failures
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Net(#[from] NetError),
    #[error("Request failed: {0:?}")]
    Failed(ErrorCode),
}

impl DispatchError {
    /// The error code reported in the failure outcome
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DispatchError::Store(e) => e.error_code(),
            DispatchError::Failed(code) => *code,
            _ => ErrorCode::Internal,
        }
    }
}

/// Admission requirement for a handler
#[derive(Debug, Clone, Copy)]
pub enum Gate {
    /// Anyone with a connection
    Unauth,
    /// Authenticated connections only
    Auth,
    /// Authenticated connections holding the named permission
    Permission(&'static str),
}

impl Gate {
    fn allows(&self, connection: &Connection) -> bool {
        match self {
            Gate::Unauth => true,
            Gate::Auth => connection.is_authenticated(),
            Gate::Permission(permission) => {
                connection.is_authenticated() && connection.has_permission(permission)
            }
        }
    }
}

/// What a handler receives
pub struct ExeletContext {
    pub connection: Arc<Connection>,
    pub envelope: Envelope,
}

/// A handler's verdict: a response payload, silence, or failure
pub type HandlerResult = Result<Option<Payload>, DispatchError>;

type HandlerFn = Arc<dyn Fn(ExeletContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A named set of handlers registered together
pub struct ExeletGroup {
    name: &'static str,
    handlers: Vec<(PayloadKind, Gate, HandlerFn)>,
}

impl ExeletGroup {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: Vec::new(),
        }
    }

    /// Attach a handler for one payload kind
    pub fn handler<F, Fut>(mut self, kind: PayloadKind, gate: Gate, handler: F) -> Self
    where
        F: Fn(ExeletContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers
            .push((kind, gate, Arc::new(move |cx| Box::pin(handler(cx)))));
        self
    }
}

/// All registered handlers, shared by every connection
pub struct ExeletRegistry {
    handlers: RwLock<HashMap<PayloadKind, (Gate, HandlerFn)>>,
    groups: RwLock<HashSet<&'static str>>,
}

impl ExeletRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashSet::new()),
        }
    }

    /// Register a group. Duplicate group names and duplicate payload kinds
    /// are startup errors.
    pub fn register(&self, group: ExeletGroup) -> Result<(), ExeletError> {
        let mut groups = self.groups.write();
        let mut handlers = self.handlers.write();
        if groups.contains(group.name) {
            return Err(ExeletError::DuplicateGroup(group.name));
        }
        for (kind, _, _) in &group.handlers {
            if handlers.contains_key(kind) {
                return Err(ExeletError::DuplicateHandler(kind.name()));
            }
        }
        // Nothing is committed until the whole group has passed validation
        groups.insert(group.name);
        for (kind, gate, handler) in group.handlers {
            handlers.insert(kind, (gate, handler));
        }
        debug!(group = group.name, "exelet group registered");
        Ok(())
    }

    /// Route one envelope to its handler on a fresh task
    pub fn dispatch(&self, connection: Arc<Connection>, envelope: Envelope) {
        let kind = envelope.payload.kind();
        let entry = self.handlers.read().get(&kind).map(|(g, h)| (*g, Arc::clone(h)));
        let Some((gate, handler)) = entry else {
            debug!(payload = kind.name(), "no handler registered, dropping");
            return;
        };
        if !gate.allows(&connection) {
            trace!(payload = kind.name(), "gate rejected, dropping");
            return;
        }

        let expects_response = kind.expects_response();
        tokio::spawn(async move {
            let request = envelope.clone();
            let result = handler(ExeletContext {
                connection: Arc::clone(&connection),
                envelope,
            })
            .await;
            match result {
                Ok(Some(payload)) => {
                    let _ = connection.reply(&request, payload).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(payload = kind.name(), error = %e, "handler failed");
                    if expects_response {
                        let outcome = Outcome::failure(e.error_code());
                        let _ = connection
                            .reply(&request, Payload::RsOutcome(outcome))
                            .await;
                    }
                }
            }
        });
    }
}

impl Default for ExeletRegistry {
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
    use crate::net::session::{generate_cvid, InstanceFlavor, InstanceType, SessionIdentity};
    use crate::net::ConnectionConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn noop_group(name: &'static str, kind: PayloadKind) -> ExeletGroup {
        ExeletGroup::new(name).handler(kind, Gate::Unauth, |_cx| async { Ok(None) })
    }

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

    #[test]
    fn test_duplicate_group_name_rejected() {
        let registry = ExeletRegistry::new();
        registry.register(noop_group("a", PayloadKind::RqPing)).unwrap();
        assert!(matches!(
            registry.register(noop_group("a", PayloadKind::RqLogout)),
            Err(ExeletError::DuplicateGroup("a"))
        ));
    }

    #[test]
    fn test_duplicate_handler_kind_rejected() {
        let registry = ExeletRegistry::new();
        registry.register(noop_group("a", PayloadKind::RqPing)).unwrap();
        assert!(matches!(
            registry.register(noop_group("b", PayloadKind::RqPing)),
            Err(ExeletError::DuplicateHandler(_))
        ));
    }

    #[test]
    fn test_rejected_group_name_is_not_reserved() {
        let registry = ExeletRegistry::new();
        registry.register(noop_group("a", PayloadKind::RqPing)).unwrap();
        assert!(registry.register(noop_group("b", PayloadKind::RqPing)).is_err());

        // The rejected registration left nothing behind, so the name is
        // still free
        registry.register(noop_group("b", PayloadKind::RqLogout)).unwrap();
    }

    #[tokio::test]
    async fn test_permission_gate() {
        let registry = ExeletRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry
            .register(ExeletGroup::new("guarded").handler(
                PayloadKind::RqPing,
                Gate::Permission("group.create"),
                move |_cx| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }
                },
            ))
            .unwrap();

        let conn = connection();
        let envelope = Envelope::rq(1, Payload::RqPing);

        // Neither anonymous nor merely authenticated callers get through
        registry.dispatch(Arc::clone(&conn), envelope.clone());
        conn.set_authenticated(true);
        registry.dispatch(Arc::clone(&conn), envelope.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        conn.grant_permissions(["group.create".to_string()]);
        registry.dispatch(conn, envelope);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
