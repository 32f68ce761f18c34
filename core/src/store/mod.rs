//! Generic entity stores
//!
//! A [`Store`] holds identified entities behind a pluggable
//! [`provider::StoreProvider`] backend and announces membership changes on a
//! broadcast channel. Entities gate their own admission through the
//! [`Entity`] validity hooks.

pub mod group;
pub mod provider;
pub mod user;

pub use group::{Group, GroupStore};
pub use user::User;

use crate::outcome::ErrorCode;
use provider::{MemoryProvider, SledProvider, StoreProvider};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of a store's membership event channel
const STORE_EVENT_CAPACITY: usize = 64;

/// Store operation errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ID conflict: {0}")]
    IdConflict(String),
    #[error("Entity rejected: {0:?}")]
    Rejected(ErrorCode),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// The error code carried into a failure outcome
    pub fn error_code(&self) -> ErrorCode {
        match self {
            StoreError::IdConflict(_) => ErrorCode::IdConflict,
            StoreError::Rejected(code) => *code,
            StoreError::Backend(_) | StoreError::Serialization(_) => ErrorCode::Internal,
        }
    }
}

/// Membership change announcements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Added(String),
    Removed(String),
}

/// An identified, self-validating store entity
pub trait Entity: Clone + Send + Sync + 'static {
    /// The entity's unique id within its store
    fn id(&self) -> &str;

    /// Check internal consistency. A non-`Ok` code rejects admission.
    fn valid(&self) -> ErrorCode {
        ErrorCode::Ok
    }

    /// Check that all required fields are present
    fn complete(&self) -> ErrorCode {
        ErrorCode::Ok
    }
}

/// A collection of entities behind a storage backend
pub struct Store<V: Entity> {
    name: &'static str,
    provider: Box<dyn StoreProvider<V>>,
    bus: broadcast::Sender<StoreEvent>,
}

impl<V: Entity> Store<V> {
    /// A store backed by volatile memory
    pub fn ephemeral(name: &'static str) -> Self {
        Self::with_provider(name, Box::new(MemoryProvider::new()))
    }

    /// A store with a caller-supplied backend
    pub fn with_provider(name: &'static str, provider: Box<dyn StoreProvider<V>>) -> Self {
        let (bus, _) = broadcast::channel(STORE_EVENT_CAPACITY);
        Self {
            name,
            provider,
            bus,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Subscribe to membership change events
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.bus.subscribe()
    }

    /// Admit a new entity. Validation runs before the backend insert; a
    /// duplicate id leaves the original untouched.
    pub fn add(&self, value: V) -> Result<(), StoreError> {
        let valid = value.valid();
        if valid != ErrorCode::Ok {
            return Err(StoreError::Rejected(valid));
        }
        let complete = value.complete();
        if complete != ErrorCode::Ok {
            return Err(StoreError::Rejected(complete));
        }

        let id = value.id().to_string();
        self.provider.insert(&id, &value)?;
        debug!(store = self.name, id = %id, "entity added");
        let _ = self.bus.send(StoreEvent::Added(id));
        Ok(())
    }

    /// Fetch an entity by id
    pub fn get(&self, id: &str) -> Result<Option<V>, StoreError> {
        self.provider.get(id)
    }

    /// Remove an entity. A no-op when absent.
    pub fn remove(&self, id: &str) -> Result<(), StoreError> {
        if self.provider.remove(id)? {
            debug!(store = self.name, id = %id, "entity removed");
            let _ = self.bus.send(StoreEvent::Removed(id.to_string()));
        }
        Ok(())
    }

    /// All entities matching a predicate
    pub fn find(&self, predicate: impl Fn(&V) -> bool) -> Result<Vec<V>, StoreError> {
        Ok(self.provider.list()?.into_iter().filter(|v| predicate(v)).collect())
    }

    /// All entities
    pub fn list(&self) -> Result<Vec<V>, StoreError> {
        self.provider.list()
    }

    /// Number of entities
    pub fn count(&self) -> Result<usize, StoreError> {
        self.provider.count()
    }
}

impl<V: Entity + Serialize + DeserializeOwned> Store<V> {
    /// A store persisted in the named sled tree
    pub fn persistent(name: &'static str, db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self::with_provider(
            name,
            Box::new(SledProvider::open(db, name)?),
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================
