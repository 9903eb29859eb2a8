//! # Branchwork
//!
//! Execution-context trees for directed node-graph engines.
//!
//! Branchwork is the coordination structure an engine threads through a
//! graph of computation nodes processing one unit of work over a batch of
//! records:
//!
//! - **Context trees**: per-node execution scopes sharing one task, message,
//!   and record mask per tree
//! - **Named wiring**: input maps resolving literals and parent outputs,
//!   lazily and concurrency-safely
//! - **Completion signaling**: single-assignment, multi-waiter barriers so
//!   sibling branches can depend on each other's results
//! - **Fold propagation**: selected child outputs merged into the parent
//!   namespace on completion
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use branchwork::prelude::*;
//!
//! // The scheduler seeds one root per windowed message.
//! let root = NodeContext::root(task, message);
//!
//! // Entering a sub-computation scope:
//! let child = root.push("generate", vec![
//!     InputBinding::parent_output("prompt", "extract"),
//! ]);
//!
//! // Inside the owning worker:
//! let inputs = child.resolve_inputs().await?;
//! child.set_output_value("completion", result)?;
//! child.complete()?;
//! child.fold()?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod context;
pub mod errors;
pub mod executor;
pub mod message;
pub mod signal;
pub mod state;
pub mod task;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::{InputBinding, InputMap, NodeContext, SourceRef};
    pub use crate::errors::ContextError;
    pub use crate::executor::{run_node, FnExecutor, NodeExecutor};
    pub use crate::message::{BatchWindow, TaskMessage};
    pub use crate::signal::CompletionSignal;
    pub use crate::state::SharedState;
    pub use crate::task::TaskDescriptor;
}
