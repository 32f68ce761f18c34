//! Serializable snapshots of state tree regions
//!
//! Snapshots are the wire form of tree content: a plain value structure with
//! no parent links or event plumbing, suitable for bincode framing. A
//! collection snapshot may be partial, meaning it only describes the members
//! it carries; a non-partial snapshot is authoritative and merging it prunes
//! members that are absent from it.

use super::AttributeValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The captured value of a single attribute
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSnapshot {
    pub value: Option<AttributeValue>,
}

impl From<Option<AttributeValue>> for AttributeSnapshot {
    fn from(value: Option<AttributeValue>) -> Self {
        Self { value }
    }
}

/// A full capture of a document subtree, keyed by child tag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub documents: BTreeMap<u64, DocumentSnapshot>,
    pub collections: BTreeMap<u64, CollectionSnapshot>,
    pub attributes: BTreeMap<u64, AttributeSnapshot>,
}

/// A capture of a collection's member documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    /// When false the snapshot is authoritative and merging prunes members
    /// not present in it
    pub partial: bool,
    pub documents: BTreeMap<u64, DocumentSnapshot>,
}

/// A snapshot of either root kind, as carried in sync requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeSnapshot {
    Document(DocumentSnapshot),
    Collection(CollectionSnapshot),
}
