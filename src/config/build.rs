// src/config/build.rs

//! Turns a validated [`ConfigFile`] into an executable graph.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::duration::parse_duration;
use crate::config::model::ConfigFile;
use crate::dag::{ConditionExpr, Edge, Graph, Node, RunConfig};
use crate::engine::TracingHooks;
use crate::errors::{LevelflowError, Result};
use crate::exec::CommandExecutor;

/// Run settings declared in `[config]`.
pub fn run_config(cfg: &ConfigFile) -> Result<RunConfig> {
    let execution_timeout = cfg
        .config
        .execution_timeout
        .as_deref()
        .map(parse_duration)
        .transpose()
        .map_err(|e| LevelflowError::ConfigError(format!("[config].execution_timeout: {e}")))?;

    Ok(RunConfig {
        max_concurrency: cfg.config.max_concurrency,
        error_strategy: cfg.config.error_strategy,
        execution_timeout,
    })
}

/// Initial shared state from `[state]`.
pub fn initial_state(cfg: &ConfigFile) -> HashMap<String, serde_json::Value> {
    cfg.state
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Build a graph of [`CommandExecutor`] nodes whose output decodes to JSON.
///
/// `run` replaces the settings from `[config]`, so CLI overrides can be
/// applied first. Levels are computed from the dependency structure.
pub fn build_graph(cfg: &ConfigFile, run: RunConfig) -> Result<Graph<serde_json::Value>> {
    let mut builder = Graph::builder(cfg.output.clone())
        .config(run)
        .hooks(Arc::new(TracingHooks));

    for (id, node_cfg) in cfg.node.iter() {
        let executor = CommandExecutor::new(node_cfg.cmd.clone())
            .with_output_format(node_cfg.output_format);
        let mut node = Node::new(id.clone(), executor);
        for dep in node_cfg.after.iter() {
            node = node.after(dep.clone());
        }
        if let Some(params) = &node_cfg.params {
            node = node.with_params(params.clone());
        }
        if let Some(timeout) = &node_cfg.timeout {
            let timeout = parse_duration(timeout)
                .map_err(|e| LevelflowError::ConfigError(format!("node '{id}' timeout: {e}")))?;
            node = node.with_timeout(timeout);
        }
        builder = builder.node(node);
    }

    for edge_cfg in cfg.edge.iter() {
        let edge = match &edge_cfg.when {
            Some(expr) => Edge {
                from: edge_cfg.from.clone(),
                to: edge_cfg.to.clone(),
                condition: Some(ConditionExpr::parse(expr)?.into_condition()),
            },
            None => Edge::always(edge_cfg.from.clone(), edge_cfg.to.clone()),
        };
        builder = builder.edge(edge);
    }

    let graph = builder.build()?;
    debug!(levels = ?graph.levels(), output = %graph.output_node(), "built graph from config");
    Ok(graph)
}
