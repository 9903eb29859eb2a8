//! Test fixtures for context-tree tests.

use crate::context::NodeContext;
use crate::message::{BatchWindow, TaskMessage};
use crate::task::TaskDescriptor;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Builder for context trees in tests.
#[derive(Debug, Default)]
pub struct TestTree {
    root_name: String,
    task_kind: Option<String>,
    params: Map<String, Value>,
    payload: Value,
    window: Option<BatchWindow>,
}

impl TestTree {
    /// Creates a builder for a tree with an unnamed root and a `test` task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the root context.
    #[must_use]
    pub fn with_root_name(mut self, name: impl Into<String>) -> Self {
        self.root_name = name.into();
        self
    }

    /// Sets the task kind.
    #[must_use]
    pub fn with_task_kind(mut self, kind: impl Into<String>) -> Self {
        self.task_kind = Some(kind.into());
        self
    }

    /// Adds a task parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Sets the message payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attaches a batch window covering `[start, end)`.
    #[must_use]
    pub fn with_window(mut self, start: usize, end: usize) -> Self {
        self.window = Some(BatchWindow::new(start, end));
        self
    }

    /// Builds the root context.
    #[must_use]
    pub fn build(&self) -> Arc<NodeContext> {
        let kind = self.task_kind.clone().unwrap_or_else(|| "test".to_string());
        let task = TaskDescriptor::new(kind, self.params.clone());
        let message = match self.window {
            Some(window) => TaskMessage::windowed(self.payload.clone(), window),
            None => TaskMessage::new(self.payload.clone()),
        };
        NodeContext::named_root(self.root_name.clone(), task, Arc::new(message))
    }
}

/// Initialises tracing output for tests; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
