//! Replicated mutation records
//!
//! A delta is one tree event rewritten relative to the entangled base, so
//! both endpoints can apply it to their own copy regardless of where the
//! subtree lives in each tree.

use crate::oid::{Oid, SlotType};
use crate::state::{AttributeValue, Collection, Document, Event, StateError};
use serde::{Deserialize, Serialize};

/// One mutation, addressed relative to the entangled base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Delta {
    Attribute {
        oid: Oid,
        value: Option<AttributeValue>,
    },
    DocumentAdded { oid: Oid },
    DocumentRemoved { oid: Oid },
    CollectionAdded { oid: Oid },
    CollectionRemoved { oid: Oid },
}

impl Delta {
    /// Rewrite a tree event relative to `base`. Events outside the base
    /// subtree produce no delta.
    pub fn from_event(event: &Event, base: &Oid) -> Option<Delta> {
        let oid = event.oid().relativize(base).ok()?;
        Some(match event {
            Event::AttributeChanged { new, .. } => Delta::Attribute {
                oid,
                value: new.clone(),
            },
            Event::DocumentAdded { .. } => Delta::DocumentAdded { oid },
            Event::DocumentRemoved { .. } => Delta::DocumentRemoved { oid },
            Event::CollectionAdded { .. } => Delta::CollectionAdded { oid },
            Event::CollectionRemoved { .. } => Delta::CollectionRemoved { oid },
        })
    }

    /// Apply the mutation under a document base
    pub fn apply_to_document(&self, base: &Document) -> Result<(), StateError> {
        match self {
            Delta::Attribute { oid, value } => {
                base.attribute_at(oid)?.merge_value(value.clone());
            }
            Delta::DocumentAdded { oid } => {
                base.document_at(oid)?;
            }
            Delta::CollectionAdded { oid } => {
                base.collection_at(oid)?;
            }
            Delta::DocumentRemoved { oid } => {
                let id = oid.last() / 10;
                match oid.parent() {
                    None => base.remove_document(id),
                    Some(parent) => match parent.slot() {
                        Some(SlotType::Collection) => {
                            base.collection_at(&parent)?.remove_document(id)
                        }
                        _ => base.document_at(&parent)?.remove_document(id),
                    },
                }
            }
            Delta::CollectionRemoved { oid } => {
                let id = oid.last() / 10;
                match oid.parent() {
                    None => base.remove_collection(id),
                    Some(parent) => base.document_at(&parent)?.remove_collection(id),
                }
            }
        }
        Ok(())
    }

    /// Apply the mutation under a collection base
    pub fn apply_to_collection(&self, base: &Collection) -> Result<(), StateError> {
        match self {
            Delta::Attribute { oid, value } => {
                base.attribute_at(oid)?.merge_value(value.clone());
            }
            Delta::DocumentAdded { oid } => {
                base.document_at(oid)?;
            }
            Delta::CollectionAdded { oid } => {
                base.collection_at(oid)?;
            }
            Delta::DocumentRemoved { oid } => {
                let id = oid.last() / 10;
                match oid.parent() {
                    None => base.remove_document(id),
                    Some(parent) => match parent.slot() {
                        Some(SlotType::Collection) => {
                            base.collection_at(&parent)?.remove_document(id)
                        }
                        _ => base.document_at(&parent)?.remove_document(id),
                    },
                }
            }
            Delta::CollectionRemoved { oid } => {
                let id = oid.last() / 10;
                match oid.parent() {
                    // A collection has no direct collection children
                    None => return Err(StateError::WrongSlot(oid.last())),
                    Some(parent) => base.document_at(&parent)?.remove_collection(id),
                }
            }
        }
        Ok(())
    }

    /// Build the wire payload for this delta
    pub(crate) fn into_payload(self, sid: u64) -> crate::net::Payload {
        crate::net::Payload::EvDelta { sid, delta: self }
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
    fn test_attribute_event_to_delta() {
        let root = Document::root(1);
        let mut events = root.subscribe();
        root.document(2).attribute(7).set("x");

        // The first event is the document creation, the second the write
        let _created = events.try_recv().unwrap();
        let changed = events.try_recv().unwrap();
        let delta = Delta::from_event(&changed, &root.oid()).unwrap();
        match delta {
            Delta::Attribute { oid, value } => {
                assert_eq!(oid.to_string(), "21.73");
                assert_eq!(value.unwrap().value, Value::Text("x".into()));
            }
            other => panic!("unexpected delta: {other:?}"),
        }
    }

    #[test]
    fn test_event_outside_base_is_skipped() {
        let root = Document::root(1);
        let mut events = root.subscribe();
        root.attribute(5).set(1i64);
        let event = events.try_recv().unwrap();

        let unrelated = Oid::root(991);
        assert!(Delta::from_event(&event, &unrelated).is_none());
    }

    #[test]
    fn test_apply_replays_mutations() {
        let source = Document::root(1);
        let mut events = source.subscribe();
        source.document(2).attribute(7).set(5i64);
        source.collection(3).document_by_key("m");
        source.document(2).remove_document(9);

        let target = Document::root(1);
        while let Ok(event) = events.try_recv() {
            if let Some(delta) = Delta::from_event(&event, &source.oid()) {
                delta.apply_to_document(&target).unwrap();
            }
        }
        assert_eq!(target.snapshot(), source.snapshot());
    }

    #[test]
    fn test_apply_removal_by_relative_oid() {
        let source = Collection::root(1);
        let target = Collection::root(1);
        source.document_by_key("gone");
        target.merge(&source.snapshot()).unwrap();
        assert_eq!(target.len(), 1);

        let mut events = source.subscribe();
        source.remove_document_by_key("gone");
        let event = events.try_recv().unwrap();
        let delta = Delta::from_event(&event, &source.oid()).unwrap();
        delta.apply_to_collection(&target).unwrap();
        assert!(target.is_empty());
    }
}
