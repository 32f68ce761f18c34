//! Session identifiers
//!
//! A CVID is a positive i32 packing the instance type in the low bits, the
//! instance flavor above it, and random bits above both. The packing lets a
//! router classify a peer from its session id alone. CVIDs are assigned by
//! the server during the session handshake and are unique per connection
//! lifetime; the instance UUID is the durable identity that survives
//! reconnects.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bits reserved for the instance type
pub const IID_SPACE: u32 = 3;
/// Bits reserved for the instance flavor
pub const FID_SPACE: u32 = 4;

/// What kind of instance a peer is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceType {
    Server = 1,
    Agent = 2,
    Viewer = 3,
}

impl InstanceType {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(InstanceType::Server),
            2 => Some(InstanceType::Agent),
            3 => Some(InstanceType::Viewer),
            _ => None,
        }
    }
}

/// The build variant of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceFlavor {
    Vanilla = 1,
    Native = 2,
    Terminal = 3,
    Desktop = 4,
    Web = 5,
}

impl InstanceFlavor {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(InstanceFlavor::Vanilla),
            2 => Some(InstanceFlavor::Native),
            3 => Some(InstanceFlavor::Terminal),
            4 => Some(InstanceFlavor::Desktop),
            5 => Some(InstanceFlavor::Web),
            _ => None,
        }
    }
}

/// Handshake validation failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Empty instance UUID")]
    EmptyUuid,
    #[error("Unrecognized instance type: {0}")]
    UnknownInstance(i32),
    #[error("A server cannot request a session")]
    ServerInstance,
    #[error("Unrecognized instance flavor: {0}")]
    UnknownFlavor(i32),
    #[error("Invalid session response")]
    InvalidResponse,
}

/// The local endpoint's identity, fixed at startup
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub instance: InstanceType,
    pub flavor: InstanceFlavor,
    pub uuid: String,
}

impl SessionIdentity {
    pub fn new(instance: InstanceType, flavor: InstanceFlavor) -> Self {
        Self {
            instance,
            flavor,
            uuid: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Generate a fresh CVID for the given instance classification.
///
/// The result is always positive and round-trips through the extractors.
pub fn generate_cvid(instance: InstanceType, flavor: InstanceFlavor) -> i32 {
    let random = (rand::random::<u32>() & 0x00FF_FFFF) as i32;
    (random << (IID_SPACE + FID_SPACE)) | ((flavor as i32) << IID_SPACE) | instance as i32
}

/// Recover the instance type packed into a CVID
pub fn extract_instance(cvid: i32) -> Option<InstanceType> {
    InstanceType::from_raw(cvid & ((1 << IID_SPACE) - 1))
}

/// Recover the instance flavor packed into a CVID
pub fn extract_flavor(cvid: i32) -> Option<InstanceFlavor> {
    InstanceFlavor::from_raw((cvid >> IID_SPACE) & ((1 << FID_SPACE) - 1))
}

/// Validate an incoming session request. Servers never request sessions
/// from other servers, and unknown classifications are refused rather than
/// defaulted.
pub fn validate_request(
    instance: i32,
    flavor: i32,
    uuid: &str,
) -> Result<(InstanceType, InstanceFlavor), SessionError> {
    if uuid.is_empty() {
        return Err(SessionError::EmptyUuid);
    }
    let instance =
        InstanceType::from_raw(instance).ok_or(SessionError::UnknownInstance(instance))?;
    if instance == InstanceType::Server {
        return Err(SessionError::ServerInstance);
    }
    let flavor = InstanceFlavor::from_raw(flavor).ok_or(SessionError::UnknownFlavor(flavor))?;
    Ok((instance, flavor))
}

/// Validate a session response on the requesting side
pub fn validate_response(cvid: i32, server_cvid: i32, server_uuid: &str) -> Result<(), SessionError> {
    if server_uuid.is_empty() {
        return Err(SessionError::EmptyUuid);
    }
    if cvid <= 0 || server_cvid <= 0 {
        return Err(SessionError::InvalidResponse);
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
