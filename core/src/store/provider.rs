//! Pluggable storage backends
//!
//! A provider owns the persistence of a store's entities. The in-memory
//! provider backs ephemeral stores; the sled provider persists entities as
//! bincode values keyed by entity id.

use super::StoreError;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;

/// Backend storage for a store's entities
pub trait StoreProvider<V>: Send + Sync {
    /// Insert a new entity. Fails with `IdConflict` if the id is taken.
    fn insert(&self, id: &str, value: &V) -> Result<(), StoreError>;

    /// Fetch an entity by id
    fn get(&self, id: &str) -> Result<Option<V>, StoreError>;

    /// Remove an entity, returning whether it existed
    fn remove(&self, id: &str) -> Result<bool, StoreError>;

    /// All stored entities
    fn list(&self) -> Result<Vec<V>, StoreError>;

    /// Number of stored entities
    fn count(&self) -> Result<usize, StoreError>;
}

/// Volatile provider backed by a hash map
pub struct MemoryProvider<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> MemoryProvider<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> Default for MemoryProvider<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> StoreProvider<V> for MemoryProvider<V> {
    fn insert(&self, id: &str, value: &V) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        if entries.contains_key(id) {
            return Err(StoreError::IdConflict(id.to_string()));
        }
        entries.insert(id.to_string(), value.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<V>, StoreError> {
        Ok(self.entries.read().get(id).cloned())
    }

    fn remove(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<V>, StoreError> {
        Ok(self.entries.read().values().cloned().collect())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.read().len())
    }
}

/// Durable provider backed by a sled tree
pub struct SledProvider<V> {
    tree: sled::Tree,
    _marker: PhantomData<fn() -> V>,
}

impl<V> SledProvider<V> {
    /// Open (or create) the named tree inside an existing database
    pub fn open(db: &sled::Db, tree_name: &str) -> Result<Self, StoreError> {
        let tree = db
            .open_tree(tree_name)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            tree,
            _marker: PhantomData,
        })
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.tree
            .flush()
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

impl<V: Serialize + DeserializeOwned + Send + Sync> StoreProvider<V> for SledProvider<V> {
    fn insert(&self, id: &str, value: &V) -> Result<(), StoreError> {
        let encoded =
            bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        // Atomic insert-if-absent
        let swap = self
            .tree
            .compare_and_swap(id, None as Option<&[u8]>, Some(encoded))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if swap.is_err() {
            return Err(StoreError::IdConflict(id.to_string()));
        }
        self.flush()
    }

    fn get(&self, id: &str) -> Result<Option<V>, StoreError> {
        match self
            .tree
            .get(id)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self
            .tree
            .remove(id)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .is_some();
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<V>, StoreError> {
        let mut values = Vec::new();
        for entry in self.tree.iter() {
            let (_, bytes) = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
            values.push(
                bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
            );
        }
        Ok(values)
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.tree.len())
    }
}

// ============================================================================
// TESTS
// ============================================================================
