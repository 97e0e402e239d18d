// src/exec/func.rs

use std::fmt;
use std::future::Future;

use crate::dag::{ExecFuture, NodeContext, NodeExecutor, NodeInput, NodeResult};

/// Adapts an async closure into a [`NodeExecutor`].
///
/// ```
/// use levelflow::dag::NodeResult;
/// use levelflow::exec::FnExecutor;
///
/// let exec = FnExecutor::new(|ctx, _input| async move {
///     Ok(Some(NodeResult::text(format!("hello from {}", ctx.node))))
/// });
/// # let _ = exec;
/// ```
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(NodeContext, NodeInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<NodeResult>>> + Send + 'static,
    {
        Self { f }
    }
}

impl<F, Fut> NodeExecutor for FnExecutor<F>
where
    F: Fn(NodeContext, NodeInput) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<NodeResult>>> + Send + 'static,
{
    fn execute(&self, ctx: NodeContext, input: NodeInput) -> ExecFuture<'_> {
        Box::pin((self.f)(ctx, input))
    }
}

impl<F> fmt::Debug for FnExecutor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnExecutor")
    }
}
