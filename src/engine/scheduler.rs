// src/engine/scheduler.rs

//! Level-by-level driver.
//!
//! Each level is dispatched as one task per ready node on a [`JoinSet`],
//! optionally gated by a semaphore, and fully joined before the next level
//! starts. There is never more than one level in flight.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dag::{Graph, NodeId, NodeResult, NodeStatus, SkipReason};
use crate::engine::readiness::ReadinessFilter;
use crate::engine::runner::{NodeOutcome, NodeRunner};
use crate::errors::{LevelflowError, Result};
use crate::state::StateProvider;
use crate::types::ErrorStrategy;

/// What happened to one dispatched node.
enum Dispatch {
    Ran(NodeOutcome),
    /// The level was cancelled before the node got a slot.
    Cancelled,
}

pub struct LevelScheduler<'a, T> {
    graph: &'a Graph<T>,
    state: Arc<dyn StateProvider>,
    run_token: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl<'a, T> LevelScheduler<'a, T> {
    /// `run_token` is cancelled by the caller or by the run deadline timer.
    pub fn new(
        graph: &'a Graph<T>,
        state: Arc<dyn StateProvider>,
        run_token: CancellationToken,
    ) -> Self {
        Self {
            graph,
            state,
            run_token,
            deadline: None,
        }
    }

    /// Report `RunTimeout` once `at` has passed.
    pub fn with_deadline(mut self, at: Instant, timeout: Duration) -> Self {
        self.deadline = Some((at, timeout));
        self
    }

    /// Drive every level in order.
    ///
    /// Under fail-fast the first collected node error stops the run; under
    /// continue-on-error failures stay on the nodes' own results.
    pub async fn run(&self) -> Result<()> {
        for (idx, level) in self.graph.levels().iter().enumerate() {
            if let Some(err) = self.interrupted(idx) {
                warn!(level = idx, error = %err, "run interrupted before level start");
                return Err(err);
            }

            self.graph.hooks.on_level_start(idx, level);

            let readiness = ReadinessFilter::new(self.graph, self.state.as_ref()).filter(level)?;
            if readiness.ready.is_empty() {
                debug!(
                    level = idx,
                    skipped = readiness.skipped.len(),
                    "no node ready in level; moving on"
                );
                continue;
            }

            info!(
                level = idx,
                ready = readiness.ready.len(),
                skipped = readiness.skipped.len(),
                "dispatching level"
            );
            self.run_level(idx, readiness.ready).await?;
        }

        Ok(())
    }

    async fn run_level(&self, level: usize, ready: Vec<NodeId>) -> Result<()> {
        let level_token = self.run_token.child_token();
        let semaphore = match self.graph.config.max_concurrency {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        let fail_fast = self.graph.config.error_strategy == ErrorStrategy::FailFast;

        let mut tasks: JoinSet<(NodeId, Dispatch)> = JoinSet::new();
        for id in &ready {
            let node = self.graph.nodes.get(id).cloned().ok_or_else(|| {
                LevelflowError::InvalidGraph(format!("level {level} references unknown node '{id}'"))
            })?;
            let runner = NodeRunner::new(
                node,
                Arc::clone(&self.state),
                self.graph.default_handle.clone(),
                Arc::clone(&self.graph.hooks),
            );
            let token = level_token.clone();
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let id = runner.node_id().to_string();
                if token.is_cancelled() {
                    return (id, Dispatch::Cancelled);
                }

                let _permit = match semaphore {
                    Some(semaphore) => tokio::select! {
                        biased;
                        _ = token.cancelled() => return (id, Dispatch::Cancelled),
                        permit = semaphore.acquire_owned() => match permit {
                            Ok(permit) => Some(permit),
                            Err(_closed) => return (id, Dispatch::Cancelled),
                        },
                    },
                    None => None,
                };

                if token.is_cancelled() {
                    return (id, Dispatch::Cancelled);
                }
                let outcome = runner.run(token).await;
                (id, Dispatch::Ran(outcome))
            });
        }

        let mut settled: HashSet<NodeId> = HashSet::with_capacity(ready.len());
        let mut first_error: Option<(NodeId, Arc<LevelflowError>)> = None;
        let mut failures = 0usize;
        let mut panicked = false;

        // Barrier: every task of this level is joined before returning.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Dispatch::Ran(Ok(())))) => {
                    settled.insert(id);
                }
                Ok((id, Dispatch::Ran(Err(err)))) => {
                    failures += 1;
                    if fail_fast && first_error.is_none() {
                        warn!(level, node = %id, error = %err, "fail-fast: cancelling level");
                        level_token.cancel();
                        first_error = Some((id.clone(), err));
                    }
                    settled.insert(id);
                }
                Ok((id, Dispatch::Cancelled)) => {
                    self.mark_cancelled(&id);
                    settled.insert(id);
                }
                Err(join_err) => {
                    error!(level, error = %join_err, "node task did not finish");
                    panicked = true;
                    if fail_fast {
                        level_token.cancel();
                    }
                }
            }
        }

        if panicked {
            for id in ready.iter().filter(|id| !settled.contains(*id)) {
                failures += 1;
                let err = self.mark_panicked(id);
                if fail_fast && first_error.is_none() {
                    first_error = Some((id.clone(), err));
                }
            }
        }

        if let Some(err) = self.interrupted(level) {
            return Err(err);
        }

        if let Some((node, source)) = first_error {
            return Err(LevelflowError::NodeFailed {
                node,
                level,
                source,
            });
        }

        if failures > 0 {
            warn!(level, failures, "level finished with failed nodes; continuing");
        } else {
            debug!(level, "level completed");
        }
        Ok(())
    }

    /// Deadline takes precedence over caller cancellation.
    fn interrupted(&self, level: usize) -> Option<LevelflowError> {
        if let Some((at, timeout)) = self.deadline {
            if Instant::now() >= at {
                return Some(LevelflowError::RunTimeout { level, timeout });
            }
        }
        if self.run_token.is_cancelled() {
            return Some(LevelflowError::Cancelled {
                scope: format!("level {level}"),
            });
        }
        None
    }

    fn mark_cancelled(&self, id: &str) {
        match self.state.set_node_status(id, NodeStatus::Skipped) {
            Ok(()) => {
                debug!(node = %id, "node cancelled before dispatch");
                self.graph.hooks.on_node_skipped(id, &SkipReason::Cancelled);
            }
            Err(err) => warn!(node = %id, error = %err, "could not mark cancelled node"),
        }
    }

    fn mark_panicked(&self, id: &str) -> Arc<LevelflowError> {
        let err = Arc::new(LevelflowError::Other(anyhow::anyhow!(
            "task for node '{id}' panicked"
        )));

        let recorded = (|| -> Result<()> {
            if self.state.get_node_status(id)? == NodeStatus::Pending {
                self.state.set_node_status(id, NodeStatus::Running)?;
            }
            let failed = Arc::new(NodeResult::failed(Arc::clone(&err), Duration::ZERO));
            self.state.record_outcome(id, failed, NodeStatus::Failed)
        })();
        if let Err(bookkeeping) = recorded {
            warn!(node = %id, error = %bookkeeping, "could not record panicked node");
        }

        self.graph.hooks.on_node_failed(id, &err);
        err
    }
}
