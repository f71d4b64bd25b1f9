//! Activity queue - ordered, deduplicating, dependency-aware execution.
//!
//! Producers submit activities concurrently and out of order; a single
//! controller task admits them strictly in id order, attaches or ignores
//! same-id duplicates, holds back activities whose dependencies are still in
//! flight and tracks what has executed as a watermark plus a gap set. Holes in
//! the arrival stream are filled from the [`actq_storage::ActivityStore`].

#![warn(missing_docs)]

mod activity;
mod config;
mod controller;
mod error;
mod graph;
mod intake;
mod loader;
mod queue;
mod resolver;


pub use activity::{Activity, Completion, CompletionHandle, Resolution};
pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use loader::ActivityLoader;
pub use queue::ActivityQueue;
