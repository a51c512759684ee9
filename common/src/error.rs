//! Error types shared by the platform seams and the payload relay.

use std::io;

use thiserror::Error;

/// Failures reported by the host platform (service binding, binder
/// transactions, package metadata).
#[derive(Debug, Error)]
pub enum HostError {
    /// The host refused the operation for permission reasons.
    #[error("permission denied: {0}")]
    Security(String),

    /// The remote process hosting the binder is gone.
    #[error("remote object is dead")]
    DeadObject,

    /// The host could not perform the operation at all.
    #[error("host unavailable: {0}")]
    Unavailable(String),

    /// Package metadata could not be read.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl HostError {
    /// True for refusals that a binding policy is expected to handle.
    pub fn is_security(&self) -> bool {
        matches!(self, HostError::Security(_))
    }
}

/// Errors raised by the single-row payload relay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The accessor is not part of the relay's single-blob contract.
    #[error("unsupported relay accessor: {0}")]
    Unsupported(&'static str),

    /// Only column 0 exists.
    #[error("column {0} out of range")]
    ColumnOutOfRange(usize),

    /// The cursor is not positioned on the single row.
    #[error("cursor is not positioned on a row")]
    NotOnRow,
}
