// src/engine/runner.rs

//! Single-node execution: input assembly, deadline, executor call, result
//! bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::{
    ExecutionHandle, Node, NodeContext, NodeId, NodeInput, NodeResult, NodeStatus,
};
use crate::engine::hooks::ExecutionHooks;
use crate::errors::LevelflowError;
use crate::state::StateProvider;

/// Outcome of one node: `Err` carries the node's own failure, shared with the
/// `NodeResult` stored in the state.
pub type NodeOutcome = Result<(), Arc<LevelflowError>>;

/// Runs one node against the shared state.
pub struct NodeRunner {
    node: Arc<Node>,
    state: Arc<dyn StateProvider>,
    handle: Option<ExecutionHandle>,
    hooks: Arc<dyn ExecutionHooks>,
}

impl NodeRunner {
    /// `default_handle` is used unless the node carries its own.
    pub fn new(
        node: Arc<Node>,
        state: Arc<dyn StateProvider>,
        default_handle: Option<ExecutionHandle>,
        hooks: Arc<dyn ExecutionHooks>,
    ) -> Self {
        let handle = node.handle.clone().or(default_handle);
        Self {
            node,
            state,
            handle,
            hooks,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node.id
    }

    /// Execute the node under `cancel` (the level-scoped token).
    ///
    /// Every failure is recorded on the node's own result and returned; none
    /// of them escapes as a panic.
    pub async fn run(self, cancel: CancellationToken) -> NodeOutcome {
        let id = self.node.id.clone();

        if let Err(err) = self.state.set_node_status(&id, NodeStatus::Running) {
            let err = Arc::new(err);
            self.hooks.on_node_failed(&id, &err);
            return Err(err);
        }
        self.hooks.on_node_start(&id);
        info!(node = %id, "starting node");

        let started = Instant::now();
        let outcome = match self.assemble_input() {
            Ok(input) => self.invoke(input, &cancel).await,
            Err(err) => Err(err),
        };
        let duration = started.elapsed();

        match outcome {
            Ok(result) => {
                let mut result = result.unwrap_or_default();
                result.duration = duration;
                let result = Arc::new(result);

                if let Err(err) =
                    self.state
                        .record_outcome(&id, Arc::clone(&result), NodeStatus::Completed)
                {
                    let err = Arc::new(err);
                    warn!(node = %id, error = %err, "could not record node result");
                    self.hooks.on_node_failed(&id, &err);
                    return Err(err);
                }

                debug!(
                    node = %id,
                    duration_ms = duration.as_millis() as u64,
                    output = result.output.kind(),
                    "node completed"
                );
                self.hooks.on_node_completed(&id, &result);
                Ok(())
            }
            Err(err) => {
                let err = Arc::new(err);
                warn!(
                    node = %id,
                    duration_ms = duration.as_millis() as u64,
                    error = %err,
                    "node failed"
                );

                let failed = Arc::new(NodeResult::failed(Arc::clone(&err), duration));
                if let Err(bookkeeping) = self.state.record_outcome(&id, failed, NodeStatus::Failed)
                {
                    // Keep the primary error.
                    warn!(node = %id, error = %bookkeeping, "could not record node failure");
                }
                self.hooks.on_node_failed(&id, &err);
                Err(err)
            }
        }
    }

    fn assemble_input(&self) -> Result<NodeInput, LevelflowError> {
        let mut upstream: HashMap<NodeId, Arc<NodeResult>> = HashMap::new();

        for dep in &self.node.dependencies {
            let result = self
                .state
                .get_node_result(dep)
                .map_err(|e| LevelflowError::Assembly {
                    node: self.node.id.clone(),
                    reason: e.to_string(),
                })?
                .ok_or_else(|| LevelflowError::Assembly {
                    node: self.node.id.clone(),
                    reason: format!("result of dependency '{dep}' is missing"),
                })?;
            upstream.insert(dep.clone(), result);
        }

        Ok(NodeInput {
            upstream,
            state: Arc::clone(&self.state),
            params: self.node.params.clone(),
            handle: self.handle.clone(),
        })
    }

    async fn invoke(
        &self,
        input: NodeInput,
        cancel: &CancellationToken,
    ) -> Result<Option<NodeResult>, LevelflowError> {
        let node_token = cancel.child_token();
        let ctx = NodeContext {
            node: self.node.id.clone(),
            cancel: node_token.clone(),
            timeout: self.node.timeout,
        };

        let call = self.node.executor.execute(ctx, input);
        let bounded = async {
            match self.node.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result.map_err(|source| self.execution_error(source)),
                    Err(_elapsed) => {
                        node_token.cancel();
                        Err(LevelflowError::NodeTimeout {
                            node: self.node.id.clone(),
                            timeout,
                        })
                    }
                },
                None => call.await.map_err(|source| self.execution_error(source)),
            }
        };

        // An executor that ignores its token is abandoned once the level is
        // cancelled; dropping the future releases whatever it holds.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LevelflowError::Cancelled {
                scope: format!("node '{}'", self.node.id),
            }),
            result = bounded => result,
        }
    }

    fn execution_error(&self, source: anyhow::Error) -> LevelflowError {
        LevelflowError::NodeExecution {
            node: self.node.id.clone(),
            source,
        }
    }
}
