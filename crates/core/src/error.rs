//! Error taxonomy for the coordination engine.

use thiserror::Error;

use crate::id::TaskId;

/// Errors synthesized by the engine itself.
///
/// Failures reported by a task's own producer are never converted into
/// this type; they travel through `await` untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsyncError {
    /// A completion was dropped before it delivered a result.
    #[error("completion dropped before a result was delivered")]
    MissingResult,

    /// A task ended without ever storing a result.
    #[error("task {0} finished without a result")]
    Unresolved(TaskId),

    /// The main context no longer accepts closures.
    #[error("main context is closed")]
    MainContextClosed,

    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker {name}: {reason}")]
    WorkerSpawn {
        /// Thread name that was requested
        name: String,
        /// Reason reported by the OS
        reason: String,
    },
}
