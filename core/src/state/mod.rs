//! In-memory state tree
//!
//! The tree is a hierarchy of [`Document`], [`Collection`], and
//! [`Attribute`] nodes addressed by [`Oid`]. Handles are cheap clones of a
//! shared node; every mutation fires a change [`Event`] that bubbles up
//! through all ancestors, so a listener at the root observes all descendant
//! mutations. Event channels are allocated lazily on first subscription and
//! released when the last receiver goes away.

pub mod event;
pub mod snapshot;

mod attribute;
mod collection;
mod document;

pub use attribute::{Attribute, AttributeValue, Value};
pub use collection::{identity_tag, Collection};
pub use document::Document;
pub use event::Event;
pub use snapshot::{AttributeSnapshot, CollectionSnapshot, DocumentSnapshot, NodeSnapshot};

use crate::oid::{slot_type, Oid, OidError, SlotType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of each node's lazily-created event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// State tree addressing and traversal errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Oid(#[from] OidError),
    #[error("OID {0} is not concrete")]
    NotConcrete(Oid),
    #[error("Unacceptable tag for this slot: {0}")]
    WrongSlot(u64),
    #[error("Cannot traverse through an attribute component: {0}")]
    TraverseAttribute(u64),
}

/// Node payload, selected once at construction and never reinterpreted
enum NodeData {
    Document {
        documents: HashMap<u64, Document>,
        collections: HashMap<u64, Collection>,
        attributes: HashMap<u64, Attribute>,
    },
    Collection {
        documents: HashMap<u64, Document>,
    },
    Attribute {
        value: Option<AttributeValue>,
    },
}

impl NodeData {
    fn empty_document() -> Self {
        NodeData::Document {
            documents: HashMap::new(),
            collections: HashMap::new(),
            attributes: HashMap::new(),
        }
    }

    fn empty_collection() -> Self {
        NodeData::Collection {
            documents: HashMap::new(),
        }
    }
}

/// Shared node state behind every handle
pub(crate) struct Node {
    oid: Oid,
    parent: Option<Weak<Node>>,
    data: Mutex<NodeData>,
    bus: Mutex<Option<broadcast::Sender<Event>>>,
    entangled: AtomicBool,
}

impl Node {
    fn new(oid: Oid, parent: Option<Weak<Node>>, data: NodeData) -> Arc<Self> {
        Arc::new(Self {
            oid,
            parent,
            data: Mutex::new(data),
            bus: Mutex::new(None),
            entangled: AtomicBool::new(false),
        })
    }

    pub(crate) fn oid(&self) -> &Oid {
        &self.oid
    }

    /// Subscribe to events observed at this node, creating the channel on
    /// first use.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        let mut bus = self.bus.lock();
        if let Some(sender) = bus.as_ref() {
            return sender.subscribe();
        }
        let (sender, receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        *bus = Some(sender);
        receiver
    }

    /// Deliver an event at this node without bubbling. Drops the channel if
    /// every receiver has gone away.
    fn emit(&self, event: &Event) {
        let mut bus = self.bus.lock();
        let orphaned = match bus.as_ref() {
            Some(sender) if sender.receiver_count() == 0 => true,
            Some(sender) => {
                // Send never blocks; a lagging receiver observes a Lagged
                // error rather than stalling the mutator.
                let _ = sender.send(event.clone());
                false
            }
            None => false,
        };
        if orphaned {
            *bus = None;
        }
    }

    /// Deliver an event here and at every ancestor. Called with no data
    /// locks held.
    pub(crate) fn bubble(self: &Arc<Self>, event: Event) {
        let mut current = Arc::clone(self);
        loop {
            current.emit(&event);
            match current.parent.as_ref().and_then(Weak::upgrade) {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }

    /// Flip the replication flag, returning the previous value
    pub(crate) fn set_entangled(&self, on: bool) -> bool {
        self.entangled.swap(on, Ordering::SeqCst)
    }

    /// Resolve a relative OID component-by-component starting at this node,
    /// auto-vivifying the chain. The final component must match `want`.
    pub(crate) fn resolve(
        self: &Arc<Self>,
        oid: &Oid,
        want: SlotType,
    ) -> Result<Arc<Node>, StateError> {
        if !oid.is_concrete() {
            return Err(StateError::NotConcrete(oid.clone()));
        }

        let mut current = Arc::clone(self);
        let components = oid.components().to_vec();
        for (index, &component) in components.iter().enumerate() {
            let last = index == components.len() - 1;
            let slot = slot_type(component).ok_or(StateError::WrongSlot(component))?;
            if last && slot != want {
                return Err(StateError::WrongSlot(component));
            }
            if !last && slot == SlotType::Attribute {
                return Err(StateError::TraverseAttribute(component));
            }
            current = current.child_node(component, slot)?;
        }
        Ok(current)
    }

    /// Fetch or create the child node bound to `component`. Fires the
    /// corresponding added event when a document or collection is created.
    fn child_node(
        self: &Arc<Self>,
        component: u64,
        slot: SlotType,
    ) -> Result<Arc<Node>, StateError> {
        let mut created: Option<Event> = None;
        let child = {
            let mut data = self.data.lock();
            match (&mut *data, slot) {
                (NodeData::Document { documents, .. }, SlotType::Document)
                | (NodeData::Collection { documents }, SlotType::Document) => documents
                    .entry(component)
                    .or_insert_with(|| {
                        created = Some(Event::DocumentAdded {
                            parent: self.oid.clone(),
                            tag: component,
                        });
                        Document::create(self, component)
                    })
                    .node()
                    .clone(),
                (NodeData::Document { collections, .. }, SlotType::Collection) => collections
                    .entry(component)
                    .or_insert_with(|| {
                        created = Some(Event::CollectionAdded {
                            parent: self.oid.clone(),
                            tag: component,
                        });
                        Collection::create(self, component)
                    })
                    .node()
                    .clone(),
                (NodeData::Document { attributes, .. }, SlotType::Attribute) => attributes
                    .entry(component)
                    .or_insert_with(|| Attribute::create(self, component))
                    .node()
                    .clone(),
                _ => return Err(StateError::WrongSlot(component)),
            }
        };
        if let Some(event) = created {
            self.bubble(event);
        }
        Ok(child)
    }
}
