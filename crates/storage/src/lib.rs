//! Storage abstraction and implementations for the activity queue.
//!
//! This crate provides the trait-based store the queue persists activities
//! and completion state through, with an in-memory and a JSON file
//! implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
pub mod json_storage;

pub use trait_::{ActivityStore, StorageError, Result};
pub use memory::MemoryStore;
pub use json_storage::JsonStore;
