//! Error types for local store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in a local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record or snapshot could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A uniqueness constraint on the sync queue was violated.
    #[error("unique constraint violated on sync queue: {constraint}")]
    UniqueViolation {
        /// Name of the violated constraint.
        constraint: String,
    },

    /// A sync queue row does not exist.
    #[error("sync queue item not found: {id}")]
    SyncItemNotFound {
        /// Row identifier.
        id: u64,
    },

    /// A sync queue row no longer matches the copy a batch was built from.
    #[error("sync queue item {id} changed concurrently")]
    Conflict {
        /// Row identifier.
        id: u64,
    },

    /// A record that must exist was not found.
    #[error("record not found: {model_type}/{id}")]
    RecordNotFound {
        /// Model type of the record.
        model_type: String,
        /// Record identifier.
        id: String,
    },

    /// A record payload is not a JSON object.
    #[error("invalid record for {model_type}: {message}")]
    InvalidRecord {
        /// Model type of the record.
        model_type: String,
        /// Description of the problem.
        message: String,
    },

    /// The store is locked by another process.
    #[error("store locked: another process holds {path}")]
    Locked {
        /// Path of the lock file.
        path: String,
    },

    /// The store snapshot on disk is unreadable.
    #[error("store snapshot corrupted: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Creates a uniqueness violation error.
    pub fn unique_violation(constraint: impl Into<String>) -> Self {
        Self::UniqueViolation {
            constraint: constraint.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(model_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            model_type: model_type.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error is a uniqueness violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }

    /// Returns true if a guarded write lost a race with another writer.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
