//! awaitkit core building blocks.
//!
//! This crate defines the pieces every operation is built from: results,
//! completions, tasks and the join counter used to fan tasks out.

#![warn(missing_docs)]

// Identities
mod id;

// Outcomes
mod error;
mod result;

// Work units
mod completion;
mod join;
mod task;

// Re-exports
pub use id::*;

pub use error::AsyncError;
pub use result::{BatchResult, Payload, ResultExt};

pub use completion::Completion;
pub use join::JoinGroup;
pub use task::{ErasedTask, OnDone, Outcome, Producer, Task, TaskType};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
