//! Executor seam between the external scheduler and node implementations.
//!
//! The scheduler owns execution order and concurrency; this crate only
//! defines the shape of a node implementation and a driver that walks one
//! context through the worker protocol.

use crate::context::NodeContext;
use crate::errors::ContextError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// A node implementation executing inside one context.
///
/// Implementations resolve their inputs through the context, compute, and
/// write results into the context's output namespace. Completion and fold
/// are the driver's responsibility, not the executor's.
#[async_trait]
pub trait NodeExecutor: Send + Sync + Debug {
    /// Computes within `ctx`.
    async fn execute(&self, ctx: Arc<NodeContext>) -> Result<(), ContextError>;
}

/// An executor built from an async closure.
pub struct FnExecutor<F, Fut>
where
    F: Fn(Arc<NodeContext>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), ContextError>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnExecutor<F, Fut>
where
    F: Fn(Arc<NodeContext>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), ContextError>> + Send,
{
    /// Creates a named closure executor.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }

    /// Returns the executor's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<F, Fut> Debug for FnExecutor<F, Fut>
where
    F: Fn(Arc<NodeContext>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), ContextError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> NodeExecutor for FnExecutor<F, Fut>
where
    F: Fn(Arc<NodeContext>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), ContextError>> + Send,
{
    async fn execute(&self, ctx: Arc<NodeContext>) -> Result<(), ContextError> {
        (self.func)(ctx).await
    }
}

/// Drives one executor through the worker protocol.
///
/// On success the context is completed and, unless it is the root, folded
/// into its parent. On executor failure the context is aborted so that
/// dependent resolvers observe [`ContextError::NodeAborted`] instead of
/// blocking forever, and the executor's error is returned.
///
/// # Errors
///
/// Propagates the executor's error, or a contract violation from the
/// complete/fold sequence.
pub async fn run_node(
    executor: &dyn NodeExecutor,
    ctx: Arc<NodeContext>,
) -> Result<(), ContextError> {
    match executor.execute(Arc::clone(&ctx)).await {
        Ok(()) => {
            ctx.complete()?;
            if !ctx.is_root() {
                ctx.fold()?;
            }
            Ok(())
        }
        Err(err) => {
            if let Err(abort_err) = ctx.abort(err.to_string()) {
                warn!(
                    path = %ctx.full_path(),
                    error = %abort_err,
                    "could not abort context after executor failure"
                );
            }
            Err(err)
        }
    }
}
