//! State tree replication
//!
//! Two peers entangle a subtree by exchanging a sync request and then
//! streaming [`Delta`] events for every subsequent mutation. Each endpoint
//! plays up to two roles decided by the direction and by who initiated:
//! a source forwards local mutations, a sink applies remote ones. Merges
//! are idempotent, so a delta echoed back to its origin produces no new
//! event and the stream stays quiet.

mod delta;
mod entangled;

pub use delta::Delta;
pub use entangled::{Entangleable, Entangled, EntangledCollection, EntangledDocument, Entanglement};

use crate::net::NetError;
use crate::outcome::ErrorCode;
use crate::state::StateError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which way mutations flow, named from the initiator's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    /// Initiator's mutations flow to the responder
    Upstream,
    /// Responder's mutations flow to the initiator
    Downstream,
    /// Mutations flow both ways
    Bidirectional,
}

impl SyncDirection {
    /// Whether an endpoint forwards its local mutations
    pub fn sources(&self, initiator: bool) -> bool {
        match self {
            SyncDirection::Upstream => initiator,
            SyncDirection::Downstream => !initiator,
            SyncDirection::Bidirectional => true,
        }
    }

    /// Whether an endpoint applies remote mutations
    pub fn sinks(&self, initiator: bool) -> bool {
        self.sources(!initiator)
    }
}

/// Parameters of one entanglement, fixed at setup
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub direction: SyncDirection,
    /// Whether this endpoint sent the sync request
    pub initiator: bool,
    /// Stream id carried by every delta frame
    pub sid: u64,
}

impl SyncConfig {
    /// Whether this endpoint forwards its local mutations
    pub fn sources(&self) -> bool {
        self.direction.sources(self.initiator)
    }

    /// Whether this endpoint applies remote mutations
    pub fn sinks(&self) -> bool {
        self.direction.sinks(self.initiator)
    }
}

/// Replication setup failures
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("The subtree is already entangled")]
    AlreadyEntangled,
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Net(#[from] NetError),
    #[error("Sync request refused: {0:?}")]
    Refused(Option<ErrorCode>),
    #[error("Snapshot kind does not match the subtree")]
    SnapshotMismatch,
}

// ============================================================================
// TESTS
// ============================================================================
