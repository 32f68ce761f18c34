//! Wire envelopes and typed payloads
//!
//! Requests carry the `Rq` prefix and expect a response with the same
//! envelope id; `Rs` payloads answer them and `Ev` payloads are one-way.
//! Requests with no dedicated response payload answer with `RsOutcome`.

use crate::oid::Oid;
use crate::outcome::Outcome;
use crate::state::NodeSnapshot;
use crate::store::Group;
use crate::sync::{Delta, SyncDirection};
use serde::{Deserialize, Serialize};

/// One framed wire message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlates a response to its request. Zero for one-way events.
    pub id: u64,
    /// Destination CVID, when routed beyond the direct peer
    pub to: Option<i32>,
    /// Origin CVID
    pub from: Option<i32>,
    pub payload: Payload,
}

impl Envelope {
    /// A request envelope with the given correlation id
    pub fn rq(id: u64, payload: Payload) -> Self {
        Self {
            id,
            to: None,
            from: None,
            payload,
        }
    }

    /// A response envelope. Reuses the request id and swaps the addresses.
    pub fn rs(request: &Envelope, payload: Payload) -> Self {
        Self {
            id: request.id,
            to: request.from,
            from: request.to,
            payload,
        }
    }

    /// A one-way event envelope
    pub fn ev(payload: Payload) -> Self {
        Self {
            id: 0,
            to: None,
            from: None,
            payload,
        }
    }
}

/// Every message the protocol can carry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Ask the server for a session id. Instance and flavor are raw so the
    /// responder can reject values it does not recognize.
    RqSession {
        instance: i32,
        flavor: i32,
        uuid: String,
    },
    /// Successful session assignment
    RsSession {
        /// CVID assigned to the requester
        cvid: i32,
        server_cvid: i32,
        server_uuid: String,
    },
    RqLogin {
        username: String,
        password: String,
    },
    RqLogout,
    RqPing,
    RsPing,
    RqAddGroup {
        group: Group,
    },
    RqRemoveGroup {
        id: String,
    },
    RqListGroups,
    RsListGroups {
        groups: Vec<Group>,
    },
    /// Begin replicating the subtree at `oid`. The optional snapshot seeds
    /// the responder when the initiator is a source.
    RqSync {
        oid: Oid,
        direction: SyncDirection,
        sid: u64,
        snapshot: Option<NodeSnapshot>,
    },
    /// Accepts a sync request. Carries the responder's snapshot when the
    /// responder is a source.
    RsSync {
        snapshot: Option<NodeSnapshot>,
    },
    /// One replicated mutation
    EvDelta {
        sid: u64,
        delta: Delta,
    },
    RsOutcome(Outcome),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::RqSession { .. } => PayloadKind::RqSession,
            Payload::RsSession { .. } => PayloadKind::RsSession,
            Payload::RqLogin { .. } => PayloadKind::RqLogin,
            Payload::RqLogout => PayloadKind::RqLogout,
            Payload::RqPing => PayloadKind::RqPing,
            Payload::RsPing => PayloadKind::RsPing,
            Payload::RqAddGroup { .. } => PayloadKind::RqAddGroup,
            Payload::RqRemoveGroup { .. } => PayloadKind::RqRemoveGroup,
            Payload::RqListGroups => PayloadKind::RqListGroups,
            Payload::RsListGroups { .. } => PayloadKind::RsListGroups,
            Payload::RqSync { .. } => PayloadKind::RqSync,
            Payload::RsSync { .. } => PayloadKind::RsSync,
            Payload::EvDelta { .. } => PayloadKind::EvDelta,
            Payload::RsOutcome(_) => PayloadKind::RsOutcome,
        }
    }
}

/// Fieldless payload discriminant, used as the dispatch key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    RqSession,
    RsSession,
    RqLogin,
    RqLogout,
    RqPing,
    RsPing,
    RqAddGroup,
    RqRemoveGroup,
    RqListGroups,
    RsListGroups,
    RqSync,
    RsSync,
    EvDelta,
    RsOutcome,
}

impl PayloadKind {
    pub fn name(&self) -> &'static str {
        match self {
            PayloadKind::RqSession => "rq_session",
            PayloadKind::RsSession => "rs_session",
            PayloadKind::RqLogin => "rq_login",
            PayloadKind::RqLogout => "rq_logout",
            PayloadKind::RqPing => "rq_ping",
            PayloadKind::RsPing => "rs_ping",
            PayloadKind::RqAddGroup => "rq_add_group",
            PayloadKind::RqRemoveGroup => "rq_remove_group",
            PayloadKind::RqListGroups => "rq_list_groups",
            PayloadKind::RsListGroups => "rs_list_groups",
            PayloadKind::RqSync => "rq_sync",
            PayloadKind::RsSync => "rs_sync",
            PayloadKind::EvDelta => "ev_delta",
            PayloadKind::RsOutcome => "rs_outcome",
        }
    }

    /// True for payloads that answer a request and are routed by envelope id
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            PayloadKind::RsSession
                | PayloadKind::RsPing
                | PayloadKind::RsListGroups
                | PayloadKind::RsSync
                | PayloadKind::RsOutcome
        )
    }

    /// Whether a sender of this payload waits for a correlated reply
    pub fn expects_response(&self) -> bool {
        matches!(
            self,
            PayloadKind::RqSession
                | PayloadKind::RqLogin
                | PayloadKind::RqLogout
                | PayloadKind::RqPing
                | PayloadKind::RqAddGroup
                | PayloadKind::RqRemoveGroup
                | PayloadKind::RqListGroups
                | PayloadKind::RqSync
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
