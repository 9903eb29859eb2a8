//! Single-assignment, multi-waiter completion signal.

use crate::errors::ContextError;
use tokio::sync::watch;
use tracing::debug;

/// How a signal was finished.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Resolved,
    Aborted(String),
}

/// A one-shot broadcast barrier marking a context's outputs as finalized.
///
/// Exactly one writer finishes the signal exactly once; any number of
/// concurrent waiters block on it and all observe the same resolution. The
/// resolution is a happens-before edge: waiters unblocked by [`wait`] see
/// the complete output namespace, never a partial write.
///
/// A signal can finish in failure through [`abort`]: waiters then observe
/// [`ContextError::NodeAborted`] instead of hanging forever on a worker
/// that died before completing. Aborting is subject to the same
/// exactly-once rule as resolving.
///
/// [`wait`]: CompletionSignal::wait
/// [`abort`]: CompletionSignal::abort
#[derive(Debug)]
pub struct CompletionSignal {
    tx: watch::Sender<Option<Resolution>>,
    path: String,
}

impl CompletionSignal {
    /// Creates a pending signal for the context at `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx,
            path: path.into(),
        }
    }

    fn finish(&self, resolution: Resolution) -> Result<(), ContextError> {
        let mut first = false;
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(resolution);
                first = true;
            }
            first
        });

        if first {
            Ok(())
        } else {
            Err(ContextError::DoubleCompletion {
                path: self.path.clone(),
            })
        }
    }

    /// Resolves the signal, unblocking every waiter.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::DoubleCompletion`] if the signal was already
    /// resolved or aborted. This is a contract violation: it would imply
    /// outputs changed after being published to waiters.
    pub fn resolve(&self) -> Result<(), ContextError> {
        self.finish(Resolution::Resolved)?;
        debug!(path = %self.path, "completion resolved");
        Ok(())
    }

    /// Finishes the signal in failure, unblocking every waiter with
    /// [`ContextError::NodeAborted`].
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::DoubleCompletion`] if the signal was already
    /// resolved or aborted.
    pub fn abort(&self, reason: impl Into<String>) -> Result<(), ContextError> {
        let reason = reason.into();
        self.finish(Resolution::Aborted(reason.clone()))?;
        debug!(path = %self.path, %reason, "completion aborted");
        Ok(())
    }

    /// Waits until the signal is finished.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NodeAborted`] if the signal was aborted.
    pub async fn wait(&self) -> Result<(), ContextError> {
        let mut rx = self.tx.subscribe();
        let resolution = match rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            // Unreachable while the signal is alive; treat as an abort.
            Err(_) => Some(Resolution::Aborted("completion signal dropped".to_string())),
        };

        match resolution {
            Some(Resolution::Resolved) => Ok(()),
            Some(Resolution::Aborted(reason)) => Err(ContextError::NodeAborted {
                path: self.path.clone(),
                reason,
            }),
            None => Err(ContextError::NodeAborted {
                path: self.path.clone(),
                reason: "completion signal dropped".to_string(),
            }),
        }
    }

    /// Returns true once the signal has been resolved or aborted.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Returns true while the signal has not been finished.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.is_resolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_signal_starts_pending() {
        let signal = CompletionSignal::new("root/n1");
        assert!(signal.is_pending());
        assert!(!signal.is_resolved());
    }

    #[test]
    fn test_second_resolve_fails() {
        let signal = CompletionSignal::new("root/n1");
        signal.resolve().unwrap();

        let err = signal.resolve().unwrap_err();
        assert!(matches!(err, ContextError::DoubleCompletion { .. }));
    }

    #[test]
    fn test_abort_after_resolve_fails() {
        let signal = CompletionSignal::new("root/n1");
        signal.resolve().unwrap();

        let err = signal.abort("too late").unwrap_err();
        assert!(matches!(err, ContextError::DoubleCompletion { .. }));
    }

    #[tokio::test]
    async fn test_wait_blocks_until_resolve() {
        let signal = Arc::new(CompletionSignal::new("root/n1"));

        let pending = tokio::time::timeout(Duration::from_millis(20), signal.wait()).await;
        assert!(pending.is_err(), "wait returned before resolution");

        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };
        signal.resolve().unwrap();

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_all_waiters_unblock() {
        let signal = Arc::new(CompletionSignal::new("root/n1"));

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let signal = Arc::clone(&signal);
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();

        signal.resolve().unwrap();

        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_abort_surfaces_to_waiters() {
        let signal = Arc::new(CompletionSignal::new("root/n1"));

        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };
        signal.abort("worker failed").unwrap();

        let err = waiter.await.unwrap().unwrap_err();
        match err {
            ContextError::NodeAborted { path, reason } => {
                assert_eq!(path, "root/n1");
                assert_eq!(reason, "worker failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_wait_after_resolve_returns_immediately() {
        let signal = CompletionSignal::new("root/n1");
        signal.resolve().unwrap();

        signal.wait().await.unwrap();
    }
}
