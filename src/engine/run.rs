// src/engine/run.rs

//! Top-level entry points: `execute`, `execute_with`, `reset`.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dag::{Graph, NodeId, NodeStatus, Usage};
use crate::engine::projector::ResultProjector;
use crate::engine::scheduler::LevelScheduler;
use crate::errors::{LevelflowError, Result};
use crate::state::{InMemoryState, StateProvider};

/// Final node status counts of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusCounts {
    fn record(&mut self, status: NodeStatus) {
        match status {
            NodeStatus::Pending => self.pending += 1,
            NodeStatus::Running => self.running += 1,
            NodeStatus::Completed => self.completed += 1,
            NodeStatus::Failed => self.failed += 1,
            NodeStatus::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Every node ended `Completed`.
    pub all_completed: bool,
    pub statuses: StatusCounts,
    /// Final status of each node, keyed by id.
    pub nodes: BTreeMap<NodeId, NodeStatus>,
    /// Sum over completed nodes that reported usage; `None` if none did.
    pub usage: Option<Usage>,
}

/// Decoded output of the designated node plus run metadata.
#[derive(Debug, Clone)]
pub struct ExecutionOutput<T> {
    pub output: T,
    pub metadata: RunMetadata,
}

impl<T> Graph<T>
where
    T: DeserializeOwned + Clone + Any,
{
    /// Run the graph against a fresh [`InMemoryState`] seeded with `initial`.
    pub async fn execute(
        &self,
        initial: HashMap<String, serde_json::Value>,
    ) -> Result<ExecutionOutput<T>> {
        self.execute_with_state(Arc::new(InMemoryState::new()), initial)
            .await
    }

    /// Run the graph against a caller-supplied state provider.
    ///
    /// The provider must not be shared with another concurrent run of the
    /// same graph.
    pub async fn execute_with_state(
        &self,
        state: Arc<dyn StateProvider>,
        initial: HashMap<String, serde_json::Value>,
    ) -> Result<ExecutionOutput<T>> {
        self.execute_with(state, initial, CancellationToken::new())
            .await
    }

    /// Like [`Graph::execute_with_state`], aborting at the next level boundary
    /// once `cancel` fires. In-flight executors see the cancellation on their
    /// own token.
    pub async fn execute_with(
        &self,
        state: Arc<dyn StateProvider>,
        initial: HashMap<String, serde_json::Value>,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput<T>> {
        let started_at = Utc::now();
        let started = Instant::now();

        self.hooks.on_run_start(&self.output_node, self.len());
        info!(
            output = %self.output_node,
            nodes = self.len(),
            levels = self.levels.len(),
            "starting run"
        );

        let outcome = self.drive(&state, initial, cancel).await;

        let metadata = self.metadata(state.as_ref(), started_at, started.elapsed());
        self.hooks.on_run_end(&metadata, outcome.as_ref().err());

        match &outcome {
            Ok(_) => info!(
                elapsed_ms = metadata.elapsed.as_millis() as u64,
                completed = metadata.statuses.completed,
                failed = metadata.statuses.failed,
                skipped = metadata.statuses.skipped,
                all_completed = metadata.all_completed,
                "run finished"
            ),
            Err(err) => warn!(
                elapsed_ms = metadata.elapsed.as_millis() as u64,
                error = %err,
                "run failed"
            ),
        }

        outcome.map(|output| ExecutionOutput { output, metadata })
    }

    async fn drive(
        &self,
        state: &Arc<dyn StateProvider>,
        initial: HashMap<String, serde_json::Value>,
        cancel: CancellationToken,
    ) -> Result<T> {
        self.seed(state.as_ref(), initial)?;

        let run_token = cancel.child_token();
        let mut scheduler = LevelScheduler::new(self, Arc::clone(state), run_token.clone());

        let mut timer = None;
        if let Some(timeout) = self.config.execution_timeout {
            let at = Instant::now() + timeout;
            scheduler = scheduler.with_deadline(at, timeout);

            let token = run_token.clone();
            timer = Some(tokio::spawn(async move {
                tokio::time::sleep_until(at).await;
                token.cancel();
            }));
        }

        let looped = scheduler.run().await;
        if let Some(timer) = timer {
            timer.abort();
        }

        let projected = state
            .get_node_result(&self.output_node)
            .and_then(|result| ResultProjector::project::<T>(&self.output_node, result.as_deref()));

        match (looped, projected) {
            (Err(loop_err), Err(projection_err)) => {
                warn!(error = %projection_err, "output projection also failed");
                Err(loop_err)
            }
            (Err(loop_err), Ok(_)) => Err(loop_err),
            (Ok(()), projected) => projected,
        }
    }
}

impl<T> Graph<T> {
    /// Clear `state` and seed it for a new run of this graph.
    pub fn reset(
        &self,
        state: &dyn StateProvider,
        initial: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        state
            .clear()
            .map_err(|e| LevelflowError::StateInit(format!("could not clear state: {e}")))?;
        self.seed(state, initial)
    }

    fn seed(
        &self,
        state: &dyn StateProvider,
        initial: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        for (key, value) in initial {
            state.set(&key, value).map_err(|e| {
                LevelflowError::StateInit(format!("could not seed key '{key}': {e}"))
            })?;
        }

        let ids: Vec<NodeId> = self.node_ids().map(str::to_string).collect();
        state.initialize_nodes(&ids).map_err(|e| {
            LevelflowError::StateInit(format!("could not initialise node statuses: {e}"))
        })
    }

    fn metadata(
        &self,
        state: &dyn StateProvider,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> RunMetadata {
        let mut statuses = StatusCounts::default();
        let mut nodes = BTreeMap::new();
        let mut usage: Option<Usage> = None;

        for id in self.node_ids() {
            let status = match state.get_node_status(id) {
                Ok(status) => status,
                Err(err) => {
                    warn!(node = %id, error = %err, "could not read final node status");
                    continue;
                }
            };
            statuses.record(status);
            nodes.insert(id.to_string(), status);

            if status == NodeStatus::Completed {
                if let Ok(Some(result)) = state.get_node_result(id) {
                    if let Some(node_usage) = &result.usage {
                        usage.get_or_insert_with(Usage::default).add(node_usage);
                    }
                }
            }
        }

        RunMetadata {
            started_at,
            finished_at: Utc::now(),
            elapsed,
            all_completed: statuses.completed == self.len(),
            statuses,
            nodes,
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{Node, NodeResult};
    use crate::exec::FnExecutor;

    fn text(id: &str, value: &'static str) -> Node {
        Node::new(
            id,
            FnExecutor::new(move |_ctx, _input| async move { Ok(Some(NodeResult::text(value))) }),
        )
    }

    #[tokio::test]
    async fn metadata_counts_statuses_and_usage() {
        let graph: Graph<String> = Graph::builder("b")
            .node(Node::new(
                "a",
                FnExecutor::new(|_ctx, _input| async {
                    Ok(Some(NodeResult::text("x").with_usage(Usage {
                        input_tokens: 3,
                        output_tokens: 2,
                        cost: 0.5,
                    })))
                }),
            ))
            .node(text("b", "done").after("a"))
            .build()
            .unwrap();

        let out = graph.execute(HashMap::new()).await.unwrap();

        assert_eq!(out.output, "done");
        assert!(out.metadata.all_completed);
        assert_eq!(out.metadata.statuses.completed, 2);
        assert_eq!(out.metadata.usage.map(|u| u.input_tokens), Some(3));
        assert!(out.metadata.finished_at >= out.metadata.started_at);

        let json = serde_json::to_value(&out.metadata).unwrap();
        assert_eq!(json["nodes"]["a"], "completed");
        assert_eq!(json["statuses"]["completed"], 2);
    }

    #[tokio::test]
    async fn reset_allows_re_execution_on_the_same_state() {
        let graph: Graph<String> = Graph::builder("a").node(text("a", "hi")).build().unwrap();
        let state: Arc<dyn StateProvider> = Arc::new(InMemoryState::new());

        let first = graph
            .execute_with_state(Arc::clone(&state), HashMap::new())
            .await
            .unwrap();
        assert_eq!(first.output, "hi");

        graph
            .reset(state.as_ref(), HashMap::from([("k".to_string(), serde_json::json!(1))]))
            .unwrap();
        assert_eq!(state.get_node_status("a").unwrap(), NodeStatus::Pending);
        assert_eq!(state.get("k"), Some(serde_json::json!(1)));

        let second = graph
            .execute_with_state(Arc::clone(&state), HashMap::new())
            .await
            .unwrap();
        assert_eq!(second.output, "hi");
    }

    #[tokio::test]
    async fn initial_state_is_visible_to_nodes() {
        let graph: Graph<String> = Graph::builder("a")
            .node(Node::new(
                "a",
                FnExecutor::new(|_ctx, input: crate::dag::NodeInput| async move {
                    let topic = input
                        .state
                        .get("topic")
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    Ok(Some(NodeResult::text(topic)))
                }),
            ))
            .build()
            .unwrap();

        let out = graph
            .execute(HashMap::from([(
                "topic".to_string(),
                serde_json::json!("rust"),
            )]))
            .await
            .unwrap();
        assert_eq!(out.output, "rust");
    }
}
