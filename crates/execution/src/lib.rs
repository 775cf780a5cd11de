//! Execution layer - operations, their workers and the blocking bridge.
//!
//! ```text
//! launch → register → worker runs workflow → barrier → finish (unregister)
//! ```

#![warn(missing_docs)]

pub mod dispatcher;
pub mod gate;
pub mod main_context;
pub mod operation;
pub mod registry;

pub use dispatcher::{launch, Dispatcher, DispatcherConfig};
pub use gate::Gate;
pub use main_context::{MainHandle, MainLoop};
pub use operation::{Hook, LaunchOptions, Operation, OperationState, Workflow};
pub use registry::Registry;
