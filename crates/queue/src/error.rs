//! Queue error type.

use actq_storage::StorageError;

/// Result alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors surfaced by the activity queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Persisting or loading through the store failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The controller is not running; the submission can never complete
    #[error("activity queue is stopped")]
    Stopped,

    /// The controller found its own bookkeeping inconsistent and stopped
    #[error("activity queue fault: {0}")]
    Internal(String),
}

impl QueueError {
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        QueueError::Internal(msg.into())
    }
}
