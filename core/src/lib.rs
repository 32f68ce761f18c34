//! Connection identity, message dispatch, and replicated state trees.
//!
//! The crate is organized around three pieces:
//!
//! - A hierarchical state tree ([`state`]) addressed by [`oid::Oid`] paths,
//!   where every mutation fires an event that bubbles to the root.
//! - A framed message transport ([`net`]) with a session handshake that
//!   assigns each peer a CVID, and an exelet dispatcher routing typed
//!   payloads to gated handlers.
//! - Subtree replication ([`sync`]), which entangles a local subtree with a
//!   remote one and streams idempotent deltas in either or both directions.
//!
//! Entity persistence ([`store`]) backs users and groups with either memory
//! or sled.

pub mod net;
pub mod oid;
pub mod outcome;
pub mod state;
pub mod store;
pub mod sync;

pub use net::{Connection, ConnectionConfig, ConnectionStore, Envelope, Payload};
pub use oid::Oid;
pub use outcome::{ErrorCode, Outcome};
pub use state::{Attribute, Collection, Document, Event};
pub use store::{Entity, Store};
pub use sync::{Delta, EntangledCollection, EntangledDocument, SyncDirection};
