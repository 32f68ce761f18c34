//! Leaf attribute nodes
//!
//! An attribute holds a single timestamped value. Writing the same value
//! twice is a no-op and fires no event, which keeps replicated trees from
//! echoing changes back to their origin.

use super::{Event, Node, NodeData};
use crate::oid::Oid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// The value payload of an attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// A value together with the wall-clock time it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub value: Value,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl AttributeValue {
    /// Stamp a value with the current time
    pub fn now(value: Value) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self { value, timestamp }
    }
}

/// A handle on an attribute node
#[derive(Clone)]
pub struct Attribute(pub(crate) Arc<Node>);

impl Attribute {
    pub(crate) fn create(parent: &Arc<Node>, tag: u64) -> Self {
        Self(Node::new(
            parent.oid().child(tag),
            Some(Arc::downgrade(parent)),
            NodeData::Attribute { value: None },
        ))
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.0
    }

    /// Absolute OID of this attribute
    pub fn oid(&self) -> Oid {
        self.0.oid().clone()
    }

    /// Identity portion of the attribute's tag
    pub fn id(&self) -> u64 {
        self.0.oid().last() / 10
    }

    /// The current timestamped value
    pub fn get(&self) -> Option<AttributeValue> {
        match &*self.0.data.lock() {
            NodeData::Attribute { value } => value.clone(),
            _ => None,
        }
    }

    /// Set the value, stamping it with the current time
    pub fn set(&self, value: impl Into<Value>) {
        self.store(Some(AttributeValue::now(value.into())));
    }

    /// Remove the value
    pub fn clear(&self) {
        self.store(None);
    }

    /// Adopt a value verbatim, preserving its original timestamp
    pub(crate) fn merge_value(&self, value: Option<AttributeValue>) {
        self.store(value);
    }

    fn store(&self, new: Option<AttributeValue>) {
        let old = {
            let mut data = self.0.data.lock();
            match &mut *data {
                NodeData::Attribute { value } => {
                    if *value == new {
                        // No change, no event
                        return;
                    }
                    std::mem::replace(value, new.clone())
                }
                _ => return,
            }
        };
        self.0.bubble(Event::AttributeChanged {
            oid: self.0.oid().clone(),
            old,
            new,
        });
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Document;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_set_fires_change_event() {
        let root = Document::root(1);
        let mut events = root.subscribe();

        root.attribute(5).set("hello");

        match events.try_recv().unwrap() {
            Event::AttributeChanged { oid, old, new } => {
                assert_eq!(oid.to_string(), "11.53");
                assert!(old.is_none());
                assert_eq!(new.unwrap().value, Value::Text("hello".into()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_identical_merge_is_silent() {
        let root = Document::root(1);
        let attr = root.attribute(5);
        attr.set(42i64);
        let current = attr.get();

        let mut events = root.subscribe();
        attr.merge_value(current);

        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_clear() {
        let root = Document::root(1);
        let attr = root.attribute(5);
        attr.set(true);
        attr.clear();
        assert!(attr.get().is_none());
    }
}
