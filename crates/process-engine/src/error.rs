//! Error types for operation processing.

use thiserror::Error;

/// Errors returned by an operation storage backend.
///
/// `Conflict` is the optimistic-concurrency signal: the stored record was
/// updated by someone else since it was read.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Operation does not exist.
    #[error("Operation not found: {0}")]
    NotFound(String),

    /// Version mismatch on update.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other backend failure (connection lost, timeout, ...).
    #[error("Storage error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns true for the optimistic-lock collision variant.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }

    /// Returns true when the record is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Errors produced while processing an operation.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// A step marked the operation as failed.
    #[error("Operation failed: {description}: {reason}")]
    OperationFailed {
        /// Human readable description stored on the operation.
        description: String,
        /// Underlying cause.
        reason: String,
    },

    /// A step returned an error without failing the operation first.
    #[error("Step {step} returned an error without failing the operation: {reason}")]
    StepBug {
        /// Name of the misbehaving step.
        step: String,
        /// Error reported by the step.
        reason: String,
    },

    /// Invalid pipeline registration.
    #[error("Registration error: {0}")]
    Registration(String),

    /// Storage failure surfaced to the caller.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type alias using ProcessError.
pub type ProcessResult<T> = Result<T, ProcessError>;
