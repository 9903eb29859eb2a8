//! Immutable task descriptor attached to a context tree.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Describes the unit of work a context tree was created for.
///
/// A descriptor is a task kind plus structured parameters. It is fixed at
/// tree creation and shared read-only by every node; per-node data belongs
/// in the output namespaces instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    kind: String,
    params: Map<String, Value>,
}

impl TaskDescriptor {
    /// Creates a descriptor with the given kind and parameters.
    #[must_use]
    pub fn new(kind: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }

    /// Creates a descriptor with the given kind and no parameters.
    #[must_use]
    pub fn of_kind(kind: impl Into<String>) -> Self {
        Self::new(kind, Map::new())
    }

    /// Adds a parameter (builder form, before the descriptor is shared).
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Returns the task kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns all parameters.
    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Returns a single parameter, if present.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns true if the descriptor carries no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}
