//! Batch message payload shared by every node in a tree.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A half-open row slice `[start, end)` over the source record batch.
///
/// Windows are produced upstream by the batch-windowing producer; this crate
/// only carries them so record masks can be validated against the window's
/// row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWindow {
    /// First row index covered by this message.
    pub start: usize,
    /// One past the last row index covered by this message.
    pub end: usize,
}

impl BatchWindow {
    /// Creates a window over `[start, end)`.
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "window start must not exceed end");
        Self { start, end }
    }

    /// Returns the number of rows in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if the window covers no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The message carried through a context tree.
///
/// Every node sees the same message instance through the shared state; the
/// payload and metadata contents are interior-mutable, the handle itself is
/// replaced only through [`crate::state::SharedState::replace_message`].
#[derive(Debug, Default)]
pub struct TaskMessage {
    window: Option<BatchWindow>,
    payload: RwLock<Value>,
    metadata: RwLock<Map<String, Value>>,
}

impl TaskMessage {
    /// Creates a message with the given payload and no batch window.
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self {
            window: None,
            payload: RwLock::new(payload),
            metadata: RwLock::new(Map::new()),
        }
    }

    /// Creates a message covering the given batch window.
    #[must_use]
    pub fn windowed(payload: Value, window: BatchWindow) -> Self {
        Self {
            window: Some(window),
            payload: RwLock::new(payload),
            metadata: RwLock::new(Map::new()),
        }
    }

    /// Returns the batch window, if this message was produced by slicing.
    #[must_use]
    pub fn window(&self) -> Option<BatchWindow> {
        self.window
    }

    /// Returns the row count of the window, when known.
    #[must_use]
    pub fn rows(&self) -> Option<usize> {
        self.window.map(|w| w.len())
    }

    /// Returns a copy of the payload.
    #[must_use]
    pub fn payload(&self) -> Value {
        self.payload.read().clone()
    }

    /// Replaces the payload content in place.
    pub fn set_payload(&self, payload: Value) {
        *self.payload.write() = payload;
    }

    /// Returns a metadata value, if present.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.metadata.read().get(key).cloned()
    }

    /// Sets a metadata value.
    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.metadata.write().insert(key.into(), value);
    }

    /// Returns a copy of all metadata.
    #[must_use]
    pub fn metadata_all(&self) -> Map<String, Value> {
        self.metadata.read().clone()
    }
}
