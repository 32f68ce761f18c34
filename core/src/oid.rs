//! Hierarchical object identifiers for the state tree
//!
//! An `Oid` is an ordered tuple of non-negative integers addressing a node
//! in the state tree. The low-order decimal digit of each component encodes
//! the slot type (document, collection, or attribute) and the remaining
//! digits carry the identity. A component of zero is a placeholder; an OID
//! with no zero components is "concrete" and can be used to traverse a tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Slot type suffix for document components
pub const SUFFIX_DOCUMENT: u64 = 1;
/// Slot type suffix for collection components
pub const SUFFIX_COLLECTION: u64 = 2;
/// Slot type suffix for attribute components
pub const SUFFIX_ATTRIBUTE: u64 = 3;

/// The kind of tree slot a component addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    Document,
    Collection,
    Attribute,
}

/// Build a document component from an identity
pub fn document_tag(id: u64) -> u64 {
    id * 10 + SUFFIX_DOCUMENT
}

/// Build a collection component from an identity
pub fn collection_tag(id: u64) -> u64 {
    id * 10 + SUFFIX_COLLECTION
}

/// Build an attribute component from an identity
pub fn attribute_tag(id: u64) -> u64 {
    id * 10 + SUFFIX_ATTRIBUTE
}

/// Decode the slot type of a component, if the suffix digit is valid
pub fn slot_type(component: u64) -> Option<SlotType> {
    match component % 10 {
        SUFFIX_DOCUMENT => Some(SlotType::Document),
        SUFFIX_COLLECTION => Some(SlotType::Collection),
        SUFFIX_ATTRIBUTE => Some(SlotType::Attribute),
        _ => None,
    }
}

/// OID construction and navigation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OidError {
    #[error("Empty OID")]
    Empty,
    #[error("OID {0} is not a child of {1}")]
    NotChildOf(Oid, Oid),
    #[error("Head length {0} out of range")]
    HeadOutOfRange(usize),
    #[error("Cannot take the tail of a single-component OID")]
    TailOfRoot,
    #[error("Malformed OID string: {0}")]
    Parse(String),
}

/// An immutable tuple address into the state tree.
///
/// Equality is component-wise tuple equality. All navigation operations are
/// side-effect free and return new values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Oid(Vec<u64>);

impl Oid {
    /// Create an OID from raw components. Fails on an empty tuple.
    pub fn new(components: Vec<u64>) -> Result<Self, OidError> {
        if components.is_empty() {
            return Err(OidError::Empty);
        }
        Ok(Self(components))
    }

    /// Create a single-component root OID
    pub fn root(component: u64) -> Self {
        Self(vec![component])
    }

    /// The raw components
    pub fn components(&self) -> &[u64] {
        &self.0
    }

    /// The first component
    pub fn first(&self) -> u64 {
        self.0[0]
    }

    /// The last component
    pub fn last(&self) -> u64 {
        self.0[self.0.len() - 1]
    }

    /// The number of components
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; an OID has at least one component
    pub fn is_empty(&self) -> bool {
        false
    }

    /// True if no component is a zero placeholder
    pub fn is_concrete(&self) -> bool {
        self.0.iter().all(|&c| c != 0)
    }

    /// The first `length` components
    pub fn head(&self, length: usize) -> Result<Oid, OidError> {
        if length == 0 || length > self.0.len() {
            return Err(OidError::HeadOutOfRange(length));
        }
        Ok(Oid(self.0[..length].to_vec()))
    }

    /// All components after the first
    pub fn tail(&self) -> Result<Oid, OidError> {
        if self.0.len() == 1 {
            return Err(OidError::TailOfRoot);
        }
        Ok(Oid(self.0[1..].to_vec()))
    }

    /// The enclosing OID, or `None` for a root
    pub fn parent(&self) -> Option<Oid> {
        if self.0.len() == 1 {
            None
        } else {
            Some(Oid(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Extend the OID with one more component
    pub fn child(&self, component: u64) -> Oid {
        let mut components = self.0.clone();
        components.push(component);
        Oid(components)
    }

    /// True if `self` extends `base` by at least one component
    pub fn is_child_of(&self, base: &Oid) -> bool {
        self.0.len() > base.0.len() && self.0[..base.0.len()] == base.0[..]
    }

    /// Strip an ancestor prefix, producing the relative remainder.
    ///
    /// Fails unless `self` is a strict child of `base`.
    pub fn relativize(&self, base: &Oid) -> Result<Oid, OidError> {
        if !self.is_child_of(base) {
            return Err(OidError::NotChildOf(self.clone(), base.clone()));
        }
        Ok(Oid(self.0[base.0.len()..].to_vec()))
    }

    /// The slot type of the final component
    pub fn slot(&self) -> Option<SlotType> {
        slot_type(self.last())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dotted = self
            .0
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{dotted}")
    }
}

impl FromStr for Oid {
    type Err = OidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let components = s
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| OidError::Parse(s.to_string()))?;
        Oid::new(components)
    }
}

impl From<u64> for Oid {
    fn from(component: u64) -> Self {
        Oid::root(component)
    }
}

// ============================================================================
// TESTS
// ============================================================================
