//! Change events fired by state tree mutations
//!
//! Every variant carries its payload directly; events are cloned into each
//! subscriber's channel as they bubble toward the root.

use super::AttributeValue;
use crate::oid::Oid;

/// A structured mutation notification
#[derive(Debug, Clone)]
pub enum Event {
    /// An attribute's value changed
    AttributeChanged {
        /// Absolute OID of the attribute
        oid: Oid,
        old: Option<AttributeValue>,
        new: Option<AttributeValue>,
    },
    /// A document was added under a document or collection
    DocumentAdded { parent: Oid, tag: u64 },
    /// A document was removed from a document or collection
    DocumentRemoved { parent: Oid, tag: u64 },
    /// A collection was added under a document
    CollectionAdded { parent: Oid, tag: u64 },
    /// A collection was removed from a document
    CollectionRemoved { parent: Oid, tag: u64 },
}

impl Event {
    /// Absolute OID of the node the event concerns
    pub fn oid(&self) -> Oid {
        match self {
            Event::AttributeChanged { oid, .. } => oid.clone(),
            Event::DocumentAdded { parent, tag }
            | Event::DocumentRemoved { parent, tag }
            | Event::CollectionAdded { parent, tag }
            | Event::CollectionRemoved { parent, tag } => parent.child(*tag),
        }
    }
}
