//! Activity queue core data models.
//!
//! This crate defines the data shared by the storage layer and the queue
//! controller: identifiers, persistable activity records, the pluggable
//! body/dependency strategy and the completion state.

#![warn(missing_docs)]

mod id;
mod activity;
mod completion;

pub use id::{ActivityId, InstanceKey};
pub use activity::{
    ActivityBody, ActivityError, ActivityFactory, ActivityRecord, Origin, Outcome,
};
pub use completion::{CompletionState, ResumePoint};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
