//! Storage trait abstraction.

use async_trait::async_trait;
use actq_core::{ActivityId, ActivityRecord, CompletionState, ResumePoint};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistent store of activities and of the completion watermark.
///
/// Shared by producers (persisting local activities), the catch-up loader and
/// the host, so every method takes `&self`.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    // === Activity operations ===

    /// Durably record an activity. Idempotent on a duplicate id.
    async fn persist_activity(&self, record: &ActivityRecord) -> Result<()>;

    /// Load at most `limit` activities with id >= `from`, ascending by id.
    async fn load_activities_from(&self, from: ActivityId, limit: usize) -> Result<Vec<ActivityRecord>>;

    /// Load the activities with the given ids, ascending by id. Unknown ids are skipped.
    async fn load_activities(&self, ids: &[ActivityId]) -> Result<Vec<ActivityRecord>>;

    /// Highest stored activity id, [`ActivityId::ZERO`] when empty.
    async fn max_activity_id(&self) -> Result<ActivityId>;

    // === Completion state ===

    /// Save the completion state.
    async fn save_completion_state(&self, state: &CompletionState) -> Result<()>;

    /// Load the persisted completion state together with the store's max id.
    async fn load_completion_state(&self) -> Result<ResumePoint>;
}
