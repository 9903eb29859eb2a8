//! Per-tree shared state: task, message slot, and record mask.

use crate::errors::ContextError;
use crate::message::TaskMessage;
use crate::task::TaskDescriptor;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

/// State shared identically by every node of one context tree.
///
/// A single instance is allocated when the root context is created and
/// referenced, never copied, by every descendant. It carries the immutable
/// task descriptor, the message slot, and the write-once record mask.
#[derive(Debug)]
pub struct SharedState {
    tree_id: Uuid,
    task: TaskDescriptor,
    message: RwLock<Arc<TaskMessage>>,
    mask: watch::Sender<Option<Arc<Vec<bool>>>>,
}

impl SharedState {
    /// Creates the shared state for a new tree.
    #[must_use]
    pub fn new(task: TaskDescriptor, message: Arc<TaskMessage>) -> Self {
        let (mask, _rx) = watch::channel(None);
        Self {
            tree_id: Uuid::new_v4(),
            task,
            message: RwLock::new(message),
            mask,
        }
    }

    /// Returns the id of the tree this state belongs to.
    #[must_use]
    pub fn tree_id(&self) -> Uuid {
        self.tree_id
    }

    /// Returns the task descriptor.
    #[must_use]
    pub fn task(&self) -> &TaskDescriptor {
        &self.task
    }

    /// Returns a handle to the current message.
    #[must_use]
    pub fn message(&self) -> Arc<TaskMessage> {
        Arc::clone(&self.message.read())
    }

    /// Replaces the message in the shared slot.
    ///
    /// Nodes that already hold a handle keep seeing the old message; the
    /// slot only affects handles obtained afterwards.
    pub fn replace_message(&self, message: Arc<TaskMessage>) {
        debug!(tree_id = %self.tree_id, "message replaced in shared slot");
        *self.message.write() = message;
    }

    /// Sets the record mask for the whole tree.
    ///
    /// The mask selects which rows of the underlying batch are active. It is
    /// write-once across the tree, by convention written by the node nearest
    /// the root that first observes the batch.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MaskAlreadySet`] on any second write, and
    /// [`ContextError::MaskLengthMismatch`] when the message carries a batch
    /// window whose row count differs from the mask length.
    pub fn set_record_mask(&self, mask: Vec<bool>) -> Result<(), ContextError> {
        if let Some(rows) = self.message().rows() {
            if mask.len() != rows {
                warn!(
                    tree_id = %self.tree_id,
                    expected = rows,
                    actual = mask.len(),
                    "rejecting record mask with wrong length"
                );
                return Err(ContextError::MaskLengthMismatch {
                    expected: rows,
                    actual: mask.len(),
                });
            }
        }

        let mut first = false;
        self.mask.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(Arc::new(mask));
                first = true;
            }
            first
        });

        if first {
            debug!(tree_id = %self.tree_id, "record mask set");
            Ok(())
        } else {
            Err(ContextError::MaskAlreadySet)
        }
    }

    /// Returns the record mask.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MaskNotSet`] if no node has written the mask
    /// yet. Callers using this probe must know from the graph's structure
    /// that an upstream node already set it; otherwise use
    /// [`wait_record_mask`](Self::wait_record_mask).
    pub fn record_mask(&self) -> Result<Arc<Vec<bool>>, ContextError> {
        self.mask
            .borrow()
            .as_ref()
            .map(Arc::clone)
            .ok_or(ContextError::MaskNotSet)
    }

    /// Waits until the record mask is set, then returns it.
    ///
    /// The wait is gated on an explicit mask-ready signal rather than on
    /// incidental call ordering, so the write happens-before every gated
    /// read.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MaskNotSet`] only in the degenerate case of
    /// the state being torn down while waiting.
    pub async fn wait_record_mask(&self) -> Result<Arc<Vec<bool>>, ContextError> {
        let mut rx = self.mask.subscribe();
        let slot = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ContextError::MaskNotSet)?;
        slot.as_ref().map(Arc::clone).ok_or(ContextError::MaskNotSet)
    }

    /// Returns true once the record mask has been set.
    #[must_use]
    pub fn has_record_mask(&self) -> bool {
        self.mask.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BatchWindow;
    use serde_json::json;

    fn state_with_rows(rows: usize) -> SharedState {
        let message = Arc::new(TaskMessage::windowed(
            json!(null),
            BatchWindow::new(0, rows),
        ));
        SharedState::new(TaskDescriptor::of_kind("test"), message)
    }

    #[test]
    fn test_mask_write_once() {
        let state = state_with_rows(3);
        state.set_record_mask(vec![true, false, true]).unwrap();

        let err = state.set_record_mask(vec![true, true, true]).unwrap_err();
        assert!(matches!(err, ContextError::MaskAlreadySet));

        // First write wins.
        assert_eq!(*state.record_mask().unwrap(), vec![true, false, true]);
    }

    #[test]
    fn test_mask_read_before_write_fails() {
        let state = state_with_rows(3);
        assert!(!state.has_record_mask());

        let err = state.record_mask().unwrap_err();
        assert!(matches!(err, ContextError::MaskNotSet));
    }

    #[test]
    fn test_mask_length_validated_against_window() {
        let state = state_with_rows(4);

        let err = state.set_record_mask(vec![true, false]).unwrap_err();
        assert!(matches!(
            err,
            ContextError::MaskLengthMismatch {
                expected: 4,
                actual: 2
            }
        ));
        assert!(!state.has_record_mask());
    }

    #[test]
    fn test_mask_unvalidated_without_window() {
        let message = Arc::new(TaskMessage::new(json!(null)));
        let state = SharedState::new(TaskDescriptor::of_kind("test"), message);

        state.set_record_mask(vec![true; 10]).unwrap();
        assert_eq!(state.record_mask().unwrap().len(), 10);
    }

    #[test]
    fn test_message_replacement_swaps_slot() {
        let state = state_with_rows(2);
        let before = state.message();

        let replacement = Arc::new(TaskMessage::new(json!({"stage": "later"})));
        state.replace_message(Arc::clone(&replacement));

        assert!(Arc::ptr_eq(&state.message(), &replacement));
        assert!(!Arc::ptr_eq(&state.message(), &before));
    }

    #[tokio::test]
    async fn test_wait_record_mask_unblocks_on_write() {
        let state = Arc::new(state_with_rows(2));

        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.wait_record_mask().await })
        };

        state.set_record_mask(vec![true, false]).unwrap();

        let mask = waiter.await.unwrap().unwrap();
        assert_eq!(*mask, vec![true, false]);
    }
}
