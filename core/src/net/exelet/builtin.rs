//! Built-in server handlers
//!
//! Covers the baseline protocol surface: login and logout, ping, group
//! management, and the responding side of state tree synchronization. All
//! handlers share one [`ServerState`].

use super::{DispatchError, ExeletError, ExeletGroup, ExeletRegistry, Gate};
use crate::net::message::{Payload, PayloadKind};
use crate::oid::SlotType;
use crate::outcome::{ErrorCode, Outcome};
use crate::state::Document;
use crate::store::{GroupStore, Store, StoreError, User};
use crate::sync::{Entangleable, Entangled, Entanglement};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything the built-in handlers operate on
pub struct ServerState {
    pub users: Store<User>,
    pub groups: GroupStore,
    /// Root of the server's state tree
    pub root: Document,
    syncs: Mutex<Vec<Entanglement>>,
}

impl ServerState {
    /// Fully in-memory state, used by tests and transient servers
    pub fn ephemeral() -> Arc<Self> {
        Arc::new(Self {
            users: Store::ephemeral("users"),
            groups: GroupStore::ephemeral(),
            root: Document::root(1),
            syncs: Mutex::new(Vec::new()),
        })
    }

    /// State with user and group stores persisted in the given database
    pub fn persistent(db: &sled::Db) -> Result<Arc<Self>, StoreError> {
        Ok(Arc::new(Self {
            users: Store::persistent("users", db)?,
            groups: GroupStore::persistent(db)?,
            root: Document::root(1),
            syncs: Mutex::new(Vec::new()),
        }))
    }

    /// Number of live entanglements this server is responding to
    pub fn sync_count(&self) -> usize {
        self.syncs.lock().len()
    }

    /// Register every built-in handler group
    pub fn register_builtins(self: &Arc<Self>, registry: &ExeletRegistry) -> Result<(), ExeletError> {
        registry.register(auth_group(Arc::clone(self)))?;
        registry.register(group_group(Arc::clone(self)))?;
        registry.register(sync_group(Arc::clone(self)))?;
        Ok(())
    }
}

fn auth_group(state: Arc<ServerState>) -> ExeletGroup {
    let login_state = Arc::clone(&state);
    ExeletGroup::new("auth")
        .handler(PayloadKind::RqLogin, Gate::Unauth, move |cx| {
            let state = Arc::clone(&login_state);
            async move {
                let Payload::RqLogin { username, password } = cx.envelope.payload.clone() else {
                    return Err(DispatchError::Failed(ErrorCode::Internal));
                };
                let outcome = Outcome::begin();
                let user = match state.users.get(&username)? {
                    Some(user) => user,
                    None => {
                        warn!(username = %username, "login refused");
                        return Ok(Some(Payload::RsOutcome(
                            outcome.failure(ErrorCode::AccessDenied),
                        )));
                    }
                };
                if !user.verify_password(&password) || user.is_expired() {
                    warn!(username = %username, "login refused");
                    return Ok(Some(Payload::RsOutcome(
                        outcome.failure(ErrorCode::AccessDenied),
                    )));
                }
                cx.connection.set_authenticated(true);
                cx.connection.set_username(user.username.clone());
                cx.connection
                    .grant_permissions(user.permissions.iter().cloned());
                debug!(username = %user.username, "login succeeded");
                Ok(Some(Payload::RsOutcome(outcome.success())))
            }
        })
        .handler(PayloadKind::RqLogout, Gate::Auth, |cx| async move {
            cx.connection.set_authenticated(false);
            cx.connection.clear_permissions();
            // Reply before tearing the transport down
            cx.connection
                .reply(&cx.envelope, Payload::RsOutcome(Outcome::begin().success()))
                .await?;
            cx.connection.close();
            Ok(None)
        })
        .handler(PayloadKind::RqPing, Gate::Unauth, |_cx| async {
            Ok(Some(Payload::RsPing))
        })
}

fn group_group(state: Arc<ServerState>) -> ExeletGroup {
    let add_state = Arc::clone(&state);
    let remove_state = Arc::clone(&state);
    let list_state = state;
    ExeletGroup::new("groups")
        .handler(PayloadKind::RqAddGroup, Gate::Auth, move |cx| {
            let state = Arc::clone(&add_state);
            async move {
                let Payload::RqAddGroup { group } = cx.envelope.payload.clone() else {
                    return Err(DispatchError::Failed(ErrorCode::Internal));
                };
                let outcome = Outcome::begin().comment(group.name.clone());
                state.groups.add(group)?;
                Ok(Some(Payload::RsOutcome(outcome.success())))
            }
        })
        .handler(PayloadKind::RqRemoveGroup, Gate::Auth, move |cx| {
            let state = Arc::clone(&remove_state);
            async move {
                let Payload::RqRemoveGroup { id } = cx.envelope.payload.clone() else {
                    return Err(DispatchError::Failed(ErrorCode::Internal));
                };
                let outcome = Outcome::begin();
                let Some(group) = state.groups.get(&id)? else {
                    return Ok(Some(Payload::RsOutcome(
                        outcome.failure(ErrorCode::UnknownGroup),
                    )));
                };
                // Only the owner may remove a group
                if cx.connection.username().as_deref() != Some(group.owner.as_str()) {
                    return Ok(Some(Payload::RsOutcome(
                        outcome.failure(ErrorCode::AccessDenied),
                    )));
                }
                state.groups.remove(&id)?;
                Ok(Some(Payload::RsOutcome(outcome.success())))
            }
        })
        .handler(PayloadKind::RqListGroups, Gate::Auth, move |cx| {
            let state = Arc::clone(&list_state);
            async move {
                let username = cx
                    .connection
                    .username()
                    .ok_or(DispatchError::Failed(ErrorCode::AccessDenied))?;
                let groups = state.groups.membership(&username)?;
                Ok(Some(Payload::RsListGroups { groups }))
            }
        })
}

fn sync_group(state: Arc<ServerState>) -> ExeletGroup {
    ExeletGroup::new("sync").handler(PayloadKind::RqSync, Gate::Auth, move |cx| {
        let state = Arc::clone(&state);
        async move {
            let Payload::RqSync {
                oid,
                direction,
                sid,
                snapshot,
            } = cx.envelope.payload.clone()
            else {
                return Err(DispatchError::Failed(ErrorCode::Internal));
            };

            match oid.slot() {
                Some(SlotType::Document) => {
                    let doc = state.root.document_at(&oid)?;
                    if let Some(snapshot) = &snapshot {
                        doc.merge_node(snapshot)?;
                    }
                    // Attach first so no mutation falls between the seed
                    // snapshot and the delta stream; duplicates merge away
                    let entangled =
                        Entangled::attach(doc.clone(), Arc::clone(&cx.connection), direction, sid)?;
                    let reply = direction.sources(false).then(|| doc.snapshot_node());
                    state.syncs.lock().push(Entanglement::Document(entangled));
                    debug!(sid, oid = %oid, "document sync attached");
                    Ok(Some(Payload::RsSync { snapshot: reply }))
                }
                Some(SlotType::Collection) => {
                    let coll = state.root.collection_at(&oid)?;
                    if let Some(snapshot) = &snapshot {
                        coll.merge_node(snapshot)?;
                    }
                    let entangled =
                        Entangled::attach(coll.clone(), Arc::clone(&cx.connection), direction, sid)?;
                    let reply = direction.sources(false).then(|| coll.snapshot_node());
                    state.syncs.lock().push(Entanglement::Collection(entangled));
                    debug!(sid, oid = %oid, "collection sync attached");
                    Ok(Some(Payload::RsSync { snapshot: reply }))
                }
                _ => Err(DispatchError::Failed(ErrorCode::InvalidConfig)),
            }
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_register_once() {
        let state = ServerState::ephemeral();
        let registry = ExeletRegistry::new();
        state.register_builtins(&registry).unwrap();
        // A second registration collides on every group name
        assert!(state.register_builtins(&registry).is_err());
    }
}
