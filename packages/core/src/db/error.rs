//! Storage Error Types
//!
//! This module defines error types for storage operations, keeping the
//! transient, retryable failure modes (lock waits, write conflicts) apart
//! from hard backend failures so callers can choose between retry and
//! reject.

use thiserror::Error;

/// Storage operation errors
///
/// Covers all error cases surfaced by a `NodeStore` backend. Structural
/// errors (impossible moves, missing nodes) are service-layer concerns and
/// live in `TreeServiceError`.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A row with this id already exists
    #[error("Duplicate node id: {id}")]
    DuplicateId { id: String },

    /// Pessimistic lock could not be acquired in time; safe to retry
    #[error("Lock wait timed out: {context}")]
    LockTimeout { context: String },

    /// Two transactions collided; safe to retry
    #[error("Write conflict: {context}")]
    WriteConflict { context: String },

    /// Transaction could not be committed
    #[error("Transaction failed: {context}")]
    TransactionFailed { context: String },

    /// Backend-specific failure
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a duplicate id error
    pub fn duplicate_id(id: impl Into<String>) -> Self {
        Self::DuplicateId { id: id.into() }
    }

    /// Create a lock timeout error
    pub fn lock_timeout(context: impl Into<String>) -> Self {
        Self::LockTimeout {
            context: context.into(),
        }
    }

    /// Create a write conflict error
    pub fn write_conflict(context: impl Into<String>) -> Self {
        Self::WriteConflict {
            context: context.into(),
        }
    }

    /// Create a transaction failed error
    pub fn transaction_failed(context: impl Into<String>) -> Self {
        Self::TransactionFailed {
            context: context.into(),
        }
    }

    /// Whether the operation may succeed if simply retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::WriteConflict { .. })
    }
}
