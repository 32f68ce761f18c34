//! Collection nodes
//!
//! A collection holds an unordered set of member documents. Members can be
//! addressed by numeric identity or by a string key that is hashed into a
//! stable document tag.

use super::snapshot::CollectionSnapshot;
use super::{Document, Event, Node, NodeData, StateError};
use crate::oid::{collection_tag, document_tag, Oid, SlotType};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Keeps hashed identities inside the range where `id * 10` cannot overflow
const IDENTITY_MASK: u64 = (1 << 60) - 1;

/// Derive a stable document tag from a string key.
///
/// The same key always produces the same tag, and the tag is never zero.
pub fn identity_tag(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let id = (u64::from_be_bytes(bytes) & IDENTITY_MASK).max(1);
    document_tag(id)
}

/// A handle on a collection node
#[derive(Clone)]
pub struct Collection(pub(crate) Arc<Node>);

impl Collection {
    /// Create a detached root collection
    pub fn root(id: u64) -> Self {
        Self(Node::new(
            Oid::root(collection_tag(id)),
            None,
            NodeData::empty_collection(),
        ))
    }

    pub(crate) fn create(parent: &Arc<Node>, tag: u64) -> Self {
        Self(Node::new(
            parent.oid().child(tag),
            Some(Arc::downgrade(parent)),
            NodeData::empty_collection(),
        ))
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.0
    }

    /// Absolute OID of this collection
    pub fn oid(&self) -> Oid {
        self.0.oid().clone()
    }

    /// Subscribe to events from this collection and all descendants
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.0.subscribe()
    }

    /// Member document by identity, created if absent
    pub fn document(&self, id: u64) -> Document {
        self.document_by_tag(document_tag(id))
            .expect("a document tag is always a valid document slot")
    }

    /// Member document by string key, created if absent
    pub fn document_by_key(&self, key: &str) -> Document {
        self.document_by_tag(identity_tag(key))
            .expect("an identity tag is always a valid document slot")
    }

    /// Member document by identity without creating it
    pub fn get_document(&self, id: u64) -> Option<Document> {
        self.get_document_by_tag(document_tag(id))
    }

    /// Member document by string key without creating it
    pub fn get_document_by_key(&self, key: &str) -> Option<Document> {
        self.get_document_by_tag(identity_tag(key))
    }

    fn get_document_by_tag(&self, tag: u64) -> Option<Document> {
        match &*self.0.data.lock() {
            NodeData::Collection { documents } => documents.get(&tag).cloned(),
            _ => None,
        }
    }

    /// Remove a member by identity. A no-op when absent.
    pub fn remove_document(&self, id: u64) {
        self.remove_by_tag(document_tag(id));
    }

    /// Remove a member by string key. A no-op when absent.
    pub fn remove_document_by_key(&self, key: &str) {
        self.remove_by_tag(identity_tag(key));
    }

    fn remove_by_tag(&self, tag: u64) {
        let removed = match &mut *self.0.data.lock() {
            NodeData::Collection { documents } => documents.remove(&tag).is_some(),
            _ => false,
        };
        if removed {
            self.0.bubble(Event::DocumentRemoved {
                parent: self.0.oid().clone(),
                tag,
            });
        }
    }

    /// All current member documents
    pub fn documents(&self) -> Vec<Document> {
        match &*self.0.data.lock() {
            NodeData::Collection { documents } => documents.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Number of member documents
    pub fn len(&self) -> usize {
        match &*self.0.data.lock() {
            NodeData::Collection { documents } => documents.len(),
            _ => 0,
        }
    }

    /// True when the collection has no members
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a relative OID to a member document, auto-vivifying the chain
    pub fn document_at(&self, oid: &Oid) -> Result<Document, StateError> {
        Ok(Document(self.0.resolve(oid, SlotType::Document)?))
    }

    /// Resolve a relative OID to a nested collection
    pub fn collection_at(&self, oid: &Oid) -> Result<Collection, StateError> {
        Ok(Collection(self.0.resolve(oid, SlotType::Collection)?))
    }

    /// Resolve a relative OID to a nested attribute
    pub fn attribute_at(&self, oid: &Oid) -> Result<super::Attribute, StateError> {
        Ok(super::Attribute(self.0.resolve(oid, SlotType::Attribute)?))
    }

    pub(crate) fn document_by_tag(&self, tag: u64) -> Result<Document, StateError> {
        self.document_at(&Oid::root(tag))
    }

    /// Capture all members as a non-partial snapshot
    pub fn snapshot(&self) -> CollectionSnapshot {
        let documents = {
            let data = self.0.data.lock();
            match &*data {
                NodeData::Collection { documents } => documents.clone(),
                _ => return CollectionSnapshot::default(),
            }
        };
        CollectionSnapshot {
            partial: false,
            documents: documents
                .iter()
                .map(|(&tag, doc)| (tag, doc.snapshot()))
                .collect(),
        }
    }

    /// Apply a snapshot. A non-partial snapshot is authoritative: members
    /// absent from it are removed, firing removal events.
    pub fn merge(&self, snapshot: &CollectionSnapshot) -> Result<(), StateError> {
        if !snapshot.partial {
            let stale: Vec<u64> = match &*self.0.data.lock() {
                NodeData::Collection { documents } => documents
                    .keys()
                    .filter(|tag| !snapshot.documents.contains_key(tag))
                    .copied()
                    .collect(),
                _ => Vec::new(),
            };
            for tag in stale {
                self.remove_by_tag(tag);
            }
        }
        for (&tag, doc_snapshot) in &snapshot.documents {
            self.document_by_tag(tag)?.merge(doc_snapshot)?;
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
