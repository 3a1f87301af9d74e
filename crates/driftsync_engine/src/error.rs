//! Error types for the sync engine.

use crate::queue::QueueType;
use driftsync_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A task with the same idempotency key is already in the queue.
    #[error("duplicate task {key} in {queue} queue")]
    DuplicateTask {
        /// Queue that rejected the task.
        queue: QueueType,
        /// Idempotency key of the rejected task.
        key: String,
    },

    /// The queue stayed full for the whole capacity-wait budget.
    #[error("{queue} queue still full after {waited:?}")]
    CapacityTimeout {
        /// Queue that rejected the task.
        queue: QueueType,
        /// How long the enqueue waited.
        waited: Duration,
    },

    /// The task was abandoned because connectivity was lost.
    #[error("{queue} queue cancelled")]
    QueueCancelled {
        /// Queue that cancelled the task.
        queue: QueueType,
    },

    /// The remote API has no such record.
    #[error("{model_type} {id} not found on server")]
    NotFound {
        /// Model type of the record.
        model_type: String,
        /// Record identifier.
        id: String,
    },

    /// The remote API reports the record as permanently removed.
    #[error("{model_type} {id} is gone from server")]
    Gone {
        /// Model type of the record.
        model_type: String,
        /// Record identifier.
        id: String,
    },

    /// The remote API failed; the request may succeed later.
    #[error("server error{}: {message}", fmt_status(.status))]
    Server {
        /// HTTP status, if any.
        status: Option<u16>,
        /// Error message.
        message: String,
    },

    /// The remote API could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The remote API rejected the payload; retrying cannot help.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Registering the edge would make the dependency graph cyclic.
    #[error("dependency {dependent} -> {dependency} would create a cycle")]
    DependencyCycle {
        /// Model type that would depend.
        dependent: String,
        /// Model type it would depend on.
        dependency: String,
    },

    /// No repository or handler is registered for the model type.
    #[error("unknown model type: {0}")]
    UnknownModelType(String),

    /// The operation is not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" {s}")).unwrap_or_default()
}

impl SyncError {
    /// Creates a not-found error.
    pub fn not_found(model_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            model_type: model_type.into(),
            id: id.into(),
        }
    }

    /// Creates a gone error.
    pub fn gone(model_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Gone {
            model_type: model_type.into(),
            id: id.into(),
        }
    }

    /// Creates a server error.
    pub fn server(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Server { .. } | SyncError::Network(_))
    }

    /// Returns true if the remote confirmed the record does not exist.
    pub fn is_absent(&self) -> bool {
        matches!(self, SyncError::NotFound { .. } | SyncError::Gone { .. })
    }

    /// Returns true if retrying the same payload can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SyncError::Validation(_)
                | SyncError::Codec(_)
                | SyncError::UnknownModelType(_)
                | SyncError::DependencyCycle { .. }
        )
    }

    /// Returns true for queue admission outcomes that say nothing about the
    /// remote API: duplicate, capacity timeout and cancellation.
    pub fn is_queue_rejection(&self) -> bool {
        matches!(
            self,
            SyncError::DuplicateTask { .. }
                | SyncError::CapacityTimeout { .. }
                | SyncError::QueueCancelled { .. }
        )
    }
}
