//! Standard request outcome envelope
//!
//! Every request that does not have a dedicated response payload answers
//! with an [`Outcome`]: a boolean result, the elapsed handler time, and
//! optional diagnostics. Build one with [`Outcome::begin`] and finish it
//! with `success`/`failure`/`complete`.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Error codes attached to failed outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Ok,
    AccessDenied,
    IdConflict,
    InvalidConfig,
    IncompleteConfig,
    InvalidUsername,
    InvalidPassword,
    InvalidGroupName,
    UnknownGroup,
    UnknownUser,
    SessionTimeout,
    Internal,
}

/// The result envelope for a completed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Whether the action succeeded
    pub result: bool,
    /// Elapsed handler time in milliseconds
    pub time: u64,
    /// Optional human-readable comment
    pub comment: Option<String>,
    /// Error code for failed outcomes
    pub error: Option<ErrorCode>,
    /// Rendered error chain for unexpected failures
    pub exception: Option<String>,
}

impl Outcome {
    /// Begin an action that will be completed with `success` or `failure`
    pub fn begin() -> OutcomeBuilder {
        OutcomeBuilder {
            start: Instant::now(),
            comment: None,
        }
    }

    /// A bare failure with no timing information
    pub fn failure(code: ErrorCode) -> Self {
        Self {
            result: false,
            time: 0,
            comment: None,
            error: Some(code),
            exception: None,
        }
    }
}

/// An in-progress outcome holding the start timestamp
#[derive(Debug)]
pub struct OutcomeBuilder {
    start: Instant,
    comment: Option<String>,
}

impl OutcomeBuilder {
    /// Attach a comment to the eventual outcome
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Complete with a successful result
    pub fn success(self) -> Outcome {
        Outcome {
            result: true,
            time: self.elapsed_ms(),
            comment: self.comment,
            error: None,
            exception: None,
        }
    }

    /// Complete with an unsuccessful result
    pub fn failure(self, code: ErrorCode) -> Outcome {
        Outcome {
            result: false,
            time: self.elapsed_ms(),
            comment: self.comment,
            error: Some(code),
            exception: None,
        }
    }

    /// Complete with a failure caused by an unexpected error
    pub fn exception(self, error: impl std::fmt::Display) -> Outcome {
        Outcome {
            result: false,
            time: self.elapsed_ms(),
            comment: self.comment,
            error: Some(ErrorCode::Internal),
            exception: Some(error.to_string()),
        }
    }

    /// Complete as success or failure depending on the code
    pub fn complete(self, code: ErrorCode) -> Outcome {
        if code == ErrorCode::Ok {
            self.success()
        } else {
            self.failure(code)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
