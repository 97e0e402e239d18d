// src/engine/hooks.rs

//! Observability hooks.
//!
//! Every method has a no-op default, so an implementation only overrides the
//! events it cares about. Hooks are called from node tasks concurrently and
//! must not block.

use tracing::{debug, info, warn};

use crate::dag::{NodeId, NodeResult, SkipReason};
use crate::engine::run::RunMetadata;
use crate::errors::LevelflowError;

pub trait ExecutionHooks: Send + Sync {
    fn on_run_start(&self, _output_node: &str, _node_count: usize) {}

    fn on_run_end(&self, _metadata: &RunMetadata, _error: Option<&LevelflowError>) {}

    fn on_level_start(&self, _level: usize, _nodes: &[NodeId]) {}

    fn on_node_start(&self, _node: &str) {}

    fn on_node_completed(&self, _node: &str, _result: &NodeResult) {}

    fn on_node_failed(&self, _node: &str, _error: &LevelflowError) {}

    fn on_node_skipped(&self, _node: &str, _reason: &SkipReason) {}
}

/// Hooks that do nothing. The default for every graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ExecutionHooks for NoopHooks {}

/// Forwards every hook to a `tracing` event under the `levelflow::hooks`
/// target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHooks;

impl ExecutionHooks for TracingHooks {
    fn on_run_start(&self, output_node: &str, node_count: usize) {
        info!(target: "levelflow::hooks", output = %output_node, node_count, "run started");
    }

    fn on_run_end(&self, metadata: &RunMetadata, error: Option<&LevelflowError>) {
        match error {
            None => info!(
                target: "levelflow::hooks",
                elapsed_ms = metadata.elapsed.as_millis() as u64,
                all_completed = metadata.all_completed,
                "run finished"
            ),
            Some(err) => warn!(
                target: "levelflow::hooks",
                elapsed_ms = metadata.elapsed.as_millis() as u64,
                error = %err,
                "run failed"
            ),
        }
    }

    fn on_level_start(&self, level: usize, nodes: &[NodeId]) {
        debug!(target: "levelflow::hooks", level, ?nodes, "level started");
    }

    fn on_node_start(&self, node: &str) {
        debug!(target: "levelflow::hooks", node = %node, "node started");
    }

    fn on_node_completed(&self, node: &str, result: &NodeResult) {
        debug!(
            target: "levelflow::hooks",
            node = %node,
            duration_ms = result.duration.as_millis() as u64,
            output = result.output.kind(),
            "node completed"
        );
    }

    fn on_node_failed(&self, node: &str, error: &LevelflowError) {
        warn!(target: "levelflow::hooks", node = %node, error = %error, "node failed");
    }

    fn on_node_skipped(&self, node: &str, reason: &SkipReason) {
        debug!(target: "levelflow::hooks", node = %node, reason = %reason, "node skipped");
    }
}
