//! Document nodes
//!
//! A document groups child documents, collections, and attributes under
//! distinct tag namespaces. Accessor methods auto-vivify missing children;
//! the `get_*` variants observe without side effects.

use super::snapshot::DocumentSnapshot;
use super::{Attribute, Collection, Event, Node, NodeData, StateError};
use crate::oid::{attribute_tag, collection_tag, document_tag, Oid, SlotType};
use std::sync::Arc;
use tokio::sync::broadcast;

/// A handle on a document node
#[derive(Clone)]
pub struct Document(pub(crate) Arc<Node>);

impl Document {
    /// Create a detached root document
    pub fn root(id: u64) -> Self {
        Self(Node::new(
            Oid::root(document_tag(id)),
            None,
            NodeData::empty_document(),
        ))
    }

    pub(crate) fn create(parent: &Arc<Node>, tag: u64) -> Self {
        Self(Node::new(
            parent.oid().child(tag),
            Some(Arc::downgrade(parent)),
            NodeData::empty_document(),
        ))
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.0
    }

    /// Absolute OID of this document
    pub fn oid(&self) -> Oid {
        self.0.oid().clone()
    }

    /// Subscribe to events from this document and all descendants
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.0.subscribe()
    }

    /// Child document by identity, created if absent
    pub fn document(&self, id: u64) -> Document {
        self.document_by_tag(document_tag(id))
            .expect("a document tag is always a valid document slot")
    }

    /// Child collection by identity, created if absent
    pub fn collection(&self, id: u64) -> Collection {
        self.collection_by_tag(collection_tag(id))
            .expect("a collection tag is always a valid collection slot")
    }

    /// Child attribute by identity, created if absent
    pub fn attribute(&self, id: u64) -> Attribute {
        self.attribute_by_tag(attribute_tag(id))
            .expect("an attribute tag is always a valid attribute slot")
    }

    /// Child document by identity without creating it
    pub fn get_document(&self, id: u64) -> Option<Document> {
        match &*self.0.data.lock() {
            NodeData::Document { documents, .. } => documents.get(&document_tag(id)).cloned(),
            _ => None,
        }
    }

    /// Child collection by identity without creating it
    pub fn get_collection(&self, id: u64) -> Option<Collection> {
        match &*self.0.data.lock() {
            NodeData::Document { collections, .. } => {
                collections.get(&collection_tag(id)).cloned()
            }
            _ => None,
        }
    }

    /// Child attribute by identity without creating it
    pub fn get_attribute(&self, id: u64) -> Option<Attribute> {
        match &*self.0.data.lock() {
            NodeData::Document { attributes, .. } => attributes.get(&attribute_tag(id)).cloned(),
            _ => None,
        }
    }

    /// Remove a child document. A no-op when absent.
    pub fn remove_document(&self, id: u64) {
        let tag = document_tag(id);
        let removed = match &mut *self.0.data.lock() {
            NodeData::Document { documents, .. } => documents.remove(&tag).is_some(),
            _ => false,
        };
        if removed {
            self.0.bubble(Event::DocumentRemoved {
                parent: self.0.oid().clone(),
                tag,
            });
        }
    }

    /// Remove a child collection. A no-op when absent.
    pub fn remove_collection(&self, id: u64) {
        let tag = collection_tag(id);
        let removed = match &mut *self.0.data.lock() {
            NodeData::Document { collections, .. } => collections.remove(&tag).is_some(),
            _ => false,
        };
        if removed {
            self.0.bubble(Event::CollectionRemoved {
                parent: self.0.oid().clone(),
                tag,
            });
        }
    }

    /// All current child documents
    pub fn documents(&self) -> Vec<Document> {
        match &*self.0.data.lock() {
            NodeData::Document { documents, .. } => documents.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// All current child collections
    pub fn collections(&self) -> Vec<Collection> {
        match &*self.0.data.lock() {
            NodeData::Document { collections, .. } => collections.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// All current child attributes
    pub fn attributes(&self) -> Vec<Attribute> {
        match &*self.0.data.lock() {
            NodeData::Document { attributes, .. } => attributes.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Resolve a relative OID to a document, auto-vivifying the chain
    pub fn document_at(&self, oid: &Oid) -> Result<Document, StateError> {
        Ok(Document(self.0.resolve(oid, SlotType::Document)?))
    }

    /// Resolve a relative OID to a collection, auto-vivifying the chain
    pub fn collection_at(&self, oid: &Oid) -> Result<Collection, StateError> {
        Ok(Collection(self.0.resolve(oid, SlotType::Collection)?))
    }

    /// Resolve a relative OID to an attribute, auto-vivifying the chain
    pub fn attribute_at(&self, oid: &Oid) -> Result<Attribute, StateError> {
        Ok(Attribute(self.0.resolve(oid, SlotType::Attribute)?))
    }

    pub(crate) fn document_by_tag(&self, tag: u64) -> Result<Document, StateError> {
        self.document_at(&Oid::root(tag))
    }

    pub(crate) fn collection_by_tag(&self, tag: u64) -> Result<Collection, StateError> {
        self.collection_at(&Oid::root(tag))
    }

    pub(crate) fn attribute_by_tag(&self, tag: u64) -> Result<Attribute, StateError> {
        self.attribute_at(&Oid::root(tag))
    }

    /// Capture the entire subtree as a value structure
    pub fn snapshot(&self) -> DocumentSnapshot {
        let (documents, collections, attributes) = {
            let data = self.0.data.lock();
            match &*data {
                NodeData::Document {
                    documents,
                    collections,
                    attributes,
                } => (documents.clone(), collections.clone(), attributes.clone()),
                _ => return DocumentSnapshot::default(),
            }
        };
        DocumentSnapshot {
            documents: documents
                .iter()
                .map(|(&tag, doc)| (tag, doc.snapshot()))
                .collect(),
            collections: collections
                .iter()
                .map(|(&tag, coll)| (tag, coll.snapshot()))
                .collect(),
            attributes: attributes
                .iter()
                .map(|(&tag, attr)| (tag, attr.get().into()))
                .collect(),
        }
    }

    /// Apply a snapshot to this subtree. Merging is idempotent; values that
    /// already match fire no events.
    pub fn merge(&self, snapshot: &DocumentSnapshot) -> Result<(), StateError> {
        for (&tag, attr_snapshot) in &snapshot.attributes {
            self.attribute_by_tag(tag)?
                .merge_value(attr_snapshot.value.clone());
        }
        for (&tag, doc_snapshot) in &snapshot.documents {
            self.document_by_tag(tag)?.merge(doc_snapshot)?;
        }
        for (&tag, coll_snapshot) in &snapshot.collections {
            self.collection_by_tag(tag)?.merge(coll_snapshot)?;
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Value;

    #[test]
    fn test_auto_vivify_chain() {
        let root = Document::root(1);
        let attr = root.document(2).document(3).attribute(7);
        assert_eq!(attr.oid().to_string(), "11.21.31.73");
    }

    #[test]
    fn test_get_has_no_side_effects() {
        let root = Document::root(1);
        assert!(root.get_document(2).is_none());
        assert!(root.get_collection(2).is_none());
        assert!(root.get_attribute(2).is_none());
        assert!(root.documents().is_empty());
    }

    #[test]
    fn test_relative_traversal() {
        let root = Document::root(1);
        let attr = root.document(2).attribute(7);
        attr.set("deep");

        let relative = attr.oid().relativize(&root.oid()).unwrap();
        let found = root.attribute_at(&relative).unwrap();
        assert_eq!(found.get().unwrap().value, Value::Text("deep".into()));
    }

    #[test]
    fn test_wrong_slot_rejected() {
        let root = Document::root(1);
        // Suffix 4 is not a valid slot type
        let oid = Oid::new(vec![21, 44]).unwrap();
        assert!(matches!(
            root.document_at(&oid),
            Err(StateError::WrongSlot(44))
        ));
    }

    #[test]
    fn test_non_concrete_rejected() {
        let root = Document::root(1);
        let oid = Oid::new(vec![21, 0]).unwrap();
        assert!(matches!(
            root.document_at(&oid),
            Err(StateError::NotConcrete(_))
        ));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let root = Document::root(1);
        let mut events = root.subscribe();
        root.remove_document(9);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_snapshot_merge_round_trip() {
        let source = Document::root(1);
        source.attribute(5).set("alpha");
        source.document(2).attribute(6).set(17i64);
        source
            .collection(4)
            .document_by_key("k1")
            .attribute(7)
            .set(true);

        let target = Document::root(1);
        target.merge(&source.snapshot()).unwrap();

        assert_eq!(target.snapshot(), source.snapshot());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let source = Document::root(1);
        source.attribute(5).set("alpha");

        let target = Document::root(1);
        let snapshot = source.snapshot();
        target.merge(&snapshot).unwrap();
        let first = target.snapshot();
        target.merge(&snapshot).unwrap();
        assert_eq!(target.snapshot(), first);
    }
}
