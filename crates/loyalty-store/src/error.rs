//! Error types for store sessions and dispatch.

use thiserror::Error;

/// Errors raised by store sessions, the statement cache and the dispatcher.
///
/// Values are `Clone` so a resolved [`WriteHandle`](crate::WriteHandle) can
/// hand the same terminal error to every caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No supplied node accepted a connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A template could not be prepared (unknown container, bad syntax, or
    /// no open session).
    #[error("Preparation error: {0}")]
    Preparation(String),

    /// Parameters do not match the template's slots.
    #[error("Bind error: {0}")]
    Bind(String),

    /// The store rejected a write or the transport failed.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// A schema/admin statement failed.
    #[error("Execute error: {0}")]
    Execute(String),

    /// The session was closed before the operation.
    #[error("Session closed")]
    SessionClosed,
}

impl StoreError {
    /// Whether the error aborts a run rather than a single operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_) | StoreError::Preparation(_) | StoreError::Execute(_)
        )
    }

    /// Re-express any error surfacing on a write handle as `WriteFailed`.
    pub(crate) fn into_write_failed(self) -> Self {
        match self {
            StoreError::WriteFailed(_) => self,
            other => StoreError::WriteFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
