//! Message transport and dispatch
//!
//! The wire unit is an [`Envelope`] carrying a typed [`Payload`], framed by
//! the length-prefixed codec in [`codec`]. A [`connection::Connection`]
//! pumps envelopes in both directions, correlates responses to requests,
//! and hands everything else to the [`exelet`] dispatcher.

pub mod codec;
pub mod connection;
pub mod exelet;
pub mod message;
pub mod session;

pub use connection::{Connection, ConnectionConfig, ConnectionEvent, ConnectionStore};
pub use message::{Envelope, Payload, PayloadKind};
pub use session::{InstanceFlavor, InstanceType, SessionIdentity};

use thiserror::Error;

/// Transport and correlation errors
#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Frame of {0} bytes exceeds the maximum")]
    FrameTooLarge(usize),
    #[error("Connection closed")]
    Closed,
    #[error("Request timed out")]
    Timeout,
    #[error("Session handshake failed: {0}")]
    Session(#[from] session::SessionError),
    #[error("Unexpected response payload")]
    UnexpectedResponse,
}
