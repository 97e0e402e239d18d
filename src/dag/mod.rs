// src/dag/mod.rs

//! Immutable graph model.
//!
//! - [`node`] defines nodes, the executor capability and node results.
//! - [`edge`] holds edges and their optional conditions.
//! - [`graph`] holds the validated graph, its levels and the builder.
//! - [`status`] defines per-run node status and skip reasons.

pub mod edge;
pub mod graph;
pub mod node;
pub mod status;

pub use edge::{ConditionExpr, Edge, EdgeCondition};
pub use graph::{Graph, GraphBuilder, RunConfig, compute_levels};
pub use node::{
    ExecFuture, ExecutionHandle, Node, NodeContext, NodeExecutor, NodeId, NodeInput, NodeOutput,
    NodeResult, Usage,
};
pub use status::{NodeStatus, SkipReason};
