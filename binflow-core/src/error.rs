//! Error type returned by every engine operation.

use std::fmt;

use crate::ports::StoreError;

#[derive(thiserror::Error, Debug)]
/// Failures raised to the immediate caller of an engine operation.
pub enum EngineError {
    /// Unknown bin, route, collection, or actor id.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record that was looked up.
        entity: &'static str,
        /// Identifier that did not resolve.
        id: String,
    },
    /// Registration conflict on the QR code.
    #[error("QR code {0} is already registered")]
    DuplicateQrCode(String),
    /// Status change not allowed from the current state.
    #[error("Cannot {action} {entity} while it is {from}")]
    InvalidTransition {
        /// Kind of record being transitioned.
        entity: &'static str,
        /// Current state, rendered for display.
        from: String,
        /// Attempted operation.
        action: &'static str,
    },
    /// Missing or malformed input.
    #[error("Validation error: {0}")]
    Validation(String),
    /// Concurrent writers kept winning the read-modify-write race.
    #[error("Gave up after repeated concurrent modifications")]
    Conflict,
    /// Persistence layer failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    /// A retried submission never went through.
    #[error("Submission failed after {attempts} attempts: {source}")]
    SubmissionFailed {
        /// Attempts made, including the first.
        attempts: u32,
        /// Error from the last attempt.
        source: Box<EngineError>,
    },
}

impl EngineError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid_transition(
        entity: &'static str,
        from: impl fmt::Debug,
        action: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: format!("{from:?}"),
            action,
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict => true,
            Self::Storage(err) => matches!(err, StoreError::Conflict | StoreError::Backend(_)),
            _ => false,
        }
    }
}
