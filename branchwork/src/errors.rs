//! Error types for context-tree operations.
//!
//! The taxonomy splits into two families: resolution failures, which the
//! scheduler reports as the failing node's result, and contract violations,
//! which indicate the tree's invariants were already broken and must be
//! surfaced loudly rather than recovered from. Use
//! [`ContextError::is_contract_violation`] to tell them apart.

use thiserror::Error;

/// The error type for all context-tree operations.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    /// A requested input name is not present in the node's input map.
    #[error("input '{name}' is not mapped for context '{path}'")]
    InputNotFound {
        /// Full path of the resolving node.
        path: String,
        /// The missing input name.
        name: String,
    },

    /// A named reference points at a key the parent never published.
    #[error("output '{name}' not found in the parent of context '{path}'")]
    OutputKeyNotFound {
        /// Full path of the resolving node.
        path: String,
        /// The missing output key.
        name: String,
    },

    /// A default-parent reference was used against a parent that published
    /// zero or several outputs.
    #[error(
        "default input of context '{path}' is ambiguous: parent published {count} outputs, expected exactly one"
    )]
    AmbiguousDefaultOutput {
        /// Full path of the resolving node.
        path: String,
        /// Number of outputs the parent actually published.
        count: usize,
    },

    /// The single-input accessor was called on a context whose input map
    /// does not contain exactly one binding.
    #[error("context '{path}' has {count} input bindings, expected exactly one")]
    AmbiguousSingleInput {
        /// Full path of the resolving node.
        path: String,
        /// Number of bindings in the input map.
        count: usize,
    },

    /// `complete` (or `abort`) was called on an already-finished context.
    #[error("completion already resolved for context '{path}'")]
    DoubleCompletion {
        /// Full path of the offending node.
        path: String,
    },

    /// `fold` was called before the context completed.
    #[error("context '{path}' folded before completion")]
    IncompleteFold {
        /// Full path of the offending node.
        path: String,
    },

    /// `fold` was called on a root context.
    #[error("root context '{path}' cannot be folded")]
    RootFold {
        /// Full path of the root node.
        path: String,
    },

    /// An output write was attempted after the namespace was finalized.
    #[error("outputs of context '{path}' are sealed by completion")]
    OutputsSealed {
        /// Full path of the sealed node.
        path: String,
    },

    /// A parent-referencing source was resolved on a context with no parent.
    #[error("context '{path}' has no parent")]
    NoParent {
        /// Full path of the offending node.
        path: String,
    },

    /// The awaited context was aborted instead of completing.
    #[error("context '{path}' aborted: {reason}")]
    NodeAborted {
        /// Full path of the aborted node.
        path: String,
        /// The reason supplied by whoever injected the failure.
        reason: String,
    },

    /// The record mask was written a second time somewhere in the tree.
    #[error("record mask already set for this tree")]
    MaskAlreadySet,

    /// The record mask was read before any node wrote it.
    #[error("record mask read before any node set it")]
    MaskNotSet,

    /// The record mask does not cover the message's batch window.
    #[error("record mask length {actual} does not match batch row count {expected}")]
    MaskLengthMismatch {
        /// Row count of the batch window.
        expected: usize,
        /// Length of the rejected mask.
        actual: usize,
    },
}

impl ContextError {
    /// Returns true for errors that indicate a broken tree invariant.
    ///
    /// These are programmer errors: downstream state is untrustworthy and
    /// the execution unit should abort loudly instead of recovering.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::DoubleCompletion { .. }
                | Self::IncompleteFold { .. }
                | Self::RootFold { .. }
                | Self::OutputsSealed { .. }
                | Self::NoParent { .. }
        )
    }
}
