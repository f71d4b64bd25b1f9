//! Activity model - the unit of replicated work.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::id::ActivityId;
use crate::Time;

/// Where an activity instance entered the queue from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Created by a local caller; must be persisted before admission
    Local,
    /// Delivered by the cluster message receiver; already persisted by the sender
    Receiver,
    /// Replayed from the persistent store
    Store,
}

impl Origin {
    /// Whether the queue has to persist the activity before it may be admitted.
    pub fn requires_persistence(self) -> bool {
        matches!(self, Origin::Local)
    }

    /// Short name used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Local => "local",
            Origin::Receiver => "receiver",
            Origin::Store => "store",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persistable part of an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Sequence number
    pub id: ActivityId,

    /// Activity type name, used by factories to rebuild the body
    pub kind: String,

    /// Type-specific data
    #[serde(default)]
    pub payload: serde_json::Value,

    /// When the activity was created
    pub created_at: Time,
}

impl ActivityRecord {
    /// Create a record with an empty payload.
    pub fn new(id: impl Into<ActivityId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload: serde_json::Value::Null,
            created_at: chrono::Utc::now(),
        }
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Failure captured from an activity body.
///
/// Never thrown across the producer/controller boundary; it travels inside
/// an [`Outcome`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActivityError {
    /// The body reported an error
    #[error("activity failed: {0}")]
    Failed(String),

    /// The body observed cancellation or was aborted
    #[error("activity canceled")]
    Canceled,

    /// The body panicked
    #[error("activity panicked: {0}")]
    Panicked(String),
}

impl ActivityError {
    /// Build a [`ActivityError::Failed`] from any displayable error.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        ActivityError::Failed(err.to_string())
    }
}

/// Result of running an activity body.
pub type Outcome = std::result::Result<(), ActivityError>;

/// Work and dependency strategy supplied with every activity.
#[async_trait]
pub trait ActivityBody: Send + Sync {
    /// Whether `candidate` (the activity carrying this body) has to wait for
    /// the already admitted `in_flight` activity.
    fn depends_on(&self, _candidate: &ActivityRecord, _in_flight: &ActivityRecord) -> bool {
        false
    }

    /// Execute the work. Errors are captured by the queue.
    async fn run(&self, record: &ActivityRecord, cancel: CancellationToken) -> Outcome;
}

/// Rebuilds activity bodies from stored records.
pub trait ActivityFactory: Send + Sync {
    /// Create the body for a record loaded from the store.
    fn create(&self, record: &ActivityRecord) -> Arc<dyn ActivityBody>;
}

impl<F> ActivityFactory for F
where
    F: Fn(&ActivityRecord) -> Arc<dyn ActivityBody> + Send + Sync,
{
    fn create(&self, record: &ActivityRecord) -> Arc<dyn ActivityBody> {
        self(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl ActivityBody for Noop {
        async fn run(&self, _record: &ActivityRecord, _cancel: CancellationToken) -> Outcome {
            Ok(())
        }
    }

    #[test]
    fn test_origin_persistence() {
        assert!(Origin::Local.requires_persistence());
        assert!(!Origin::Receiver.requires_persistence());
        assert!(!Origin::Store.requires_persistence());
    }

    #[test]
    fn test_record_serde() {
        let record = ActivityRecord::new(7, "SetAcl").with_payload(serde_json::json!({"entity": 42}));
        let json = serde_json::to_string(&record).unwrap();
        let back: ActivityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert!(json.contains("\"id\":7"));
    }

    #[tokio::test]
    async fn test_closure_factory() {
        let factory = |_: &ActivityRecord| -> Arc<dyn ActivityBody> { Arc::new(Noop) };
        let record = ActivityRecord::new(1, "Noop");
        let body = factory.create(&record);
        assert!(!body.depends_on(&record, &record));
        assert_eq!(body.run(&record, CancellationToken::new()).await, Ok(()));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ActivityError::failed("disk full").to_string(), "activity failed: disk full");
        assert_eq!(ActivityError::Canceled.to_string(), "activity canceled");
    }
}
