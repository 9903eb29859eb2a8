//! Context-tree nodes and input wiring.
//!
//! This module provides:
//! - The tree node itself, with child creation and fold-to-parent
//! - Input bindings and the blocking name-resolution protocol

mod inputs;
mod node;


pub use inputs::{InputBinding, InputMap, SourceRef};
pub use node::NodeContext;
