//! Input bindings wiring parent outputs into a child context.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a bound input value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceRef {
    /// A value carried verbatim in the binding; resolves without blocking.
    Literal(Value),
    /// The single output of the parent, once the parent completes.
    ///
    /// Valid only when the parent publishes exactly one output.
    ParentDefault,
    /// A named key in the parent's output namespace.
    ParentOutput(String),
}

/// One `(target, source)` entry of a context's input map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBinding {
    /// Name the resolved value is exposed under in this context.
    pub target: String,
    /// Where the value comes from.
    pub source: SourceRef,
}

impl InputBinding {
    /// Binds `target` to a literal value.
    #[must_use]
    pub fn literal(target: impl Into<String>, value: Value) -> Self {
        Self {
            target: target.into(),
            source: SourceRef::Literal(value),
        }
    }

    /// Binds `target` to the parent's single default output.
    #[must_use]
    pub fn parent_default(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: SourceRef::ParentDefault,
        }
    }

    /// Binds `target` to the named key in the parent's outputs.
    #[must_use]
    pub fn parent_output(target: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: SourceRef::ParentOutput(key.into()),
        }
    }
}

/// An ordered input map, fixed at child-creation time.
pub type InputMap = Vec<InputBinding>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binding_constructors() {
        let literal = InputBinding::literal("prompt", json!("hello"));
        assert_eq!(literal.target, "prompt");
        assert_eq!(literal.source, SourceRef::Literal(json!("hello")));

        let default = InputBinding::parent_default("input");
        assert_eq!(default.source, SourceRef::ParentDefault);

        let named = InputBinding::parent_output("query", "embedding");
        assert_eq!(named.source, SourceRef::ParentOutput("embedding".to_string()));
    }

    #[test]
    fn test_binding_serialization_round_trip() {
        let map: InputMap = vec![
            InputBinding::literal("a", json!(1)),
            InputBinding::parent_output("b", "x"),
            InputBinding::parent_default("c"),
        ];

        let json = serde_json::to_string(&map).unwrap();
        let back: InputMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map, back);
    }
}
