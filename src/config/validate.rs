// src/config/validate.rs

use std::collections::BTreeSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::ConditionExpr;
use crate::errors::{LevelflowError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = LevelflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let output = resolve_output(&raw)?;
        Ok(ConfigFile::new_unchecked(raw, output))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_nodes(cfg)?;
    validate_global_config(cfg)?;
    validate_node_dependencies(cfg)?;
    validate_edges(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_nodes(cfg: &RawConfigFile) -> Result<()> {
    if cfg.node.is_empty() {
        return Err(LevelflowError::ConfigError(
            "config must contain at least one [node.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if let Some(timeout) = &cfg.config.execution_timeout {
        parse_duration(timeout).map_err(|e| {
            LevelflowError::ConfigError(format!("[config].execution_timeout: {e}"))
        })?;
    }
    for (id, node) in cfg.node.iter() {
        if node.cmd.trim().is_empty() {
            return Err(LevelflowError::ConfigError(format!(
                "node '{id}' has an empty `cmd`"
            )));
        }
        if let Some(timeout) = &node.timeout {
            parse_duration(timeout).map_err(|e| {
                LevelflowError::ConfigError(format!("node '{id}' timeout: {e}"))
            })?;
        }
    }
    Ok(())
}

fn validate_node_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (id, node) in cfg.node.iter() {
        for dep in node.after.iter() {
            if !cfg.node.contains_key(dep) {
                return Err(LevelflowError::ConfigError(format!(
                    "node '{id}' has unknown dependency '{dep}' in `after`"
                )));
            }
            if dep == id {
                return Err(LevelflowError::ConfigError(format!(
                    "node '{id}' cannot depend on itself in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_edges(cfg: &RawConfigFile) -> Result<()> {
    for edge in cfg.edge.iter() {
        for endpoint in [&edge.from, &edge.to] {
            if !cfg.node.contains_key(endpoint) {
                return Err(LevelflowError::ConfigError(format!(
                    "edge {} -> {} references unknown node '{endpoint}'",
                    edge.from, edge.to
                )));
            }
        }
        if edge.from == edge.to {
            return Err(LevelflowError::ConfigError(format!(
                "edge {} -> {} connects a node to itself",
                edge.from, edge.to
            )));
        }
        if let Some(expr) = &edge.when {
            ConditionExpr::parse(expr).map_err(|e| {
                LevelflowError::ConfigError(format!(
                    "edge {} -> {} has an invalid condition: {e}",
                    edge.from, edge.to
                ))
            })?;
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> node.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for id in cfg.node.keys() {
        graph.add_node(id.as_str());
    }
    for (id, node) in cfg.node.iter() {
        for dep in node.after.iter() {
            graph.add_edge(dep.as_str(), id.as_str(), ());
        }
    }
    for edge in cfg.edge.iter() {
        graph.add_edge(edge.from.as_str(), edge.to.as_str(), ());
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(LevelflowError::DagCycle(format!(
            "cycle detected in node graph involving node '{}'",
            cycle.node_id()
        ))),
    }
}

/// Explicit `[config].output`, else the only node without dependents.
fn resolve_output(cfg: &RawConfigFile) -> Result<String> {
    if let Some(output) = &cfg.config.output {
        if !cfg.node.contains_key(output) {
            return Err(LevelflowError::ConfigError(format!(
                "[config].output names unknown node '{output}'"
            )));
        }
        return Ok(output.clone());
    }

    let mut has_dependents: BTreeSet<&str> = cfg
        .node
        .values()
        .flat_map(|n| n.after.iter().map(String::as_str))
        .collect();
    has_dependents.extend(cfg.edge.iter().map(|e| e.from.as_str()));

    let sinks: Vec<&String> = cfg
        .node
        .keys()
        .filter(|id| !has_dependents.contains(id.as_str()))
        .collect();

    match sinks.as_slice() {
        [only] => Ok((*only).clone()),
        _ => Err(LevelflowError::ConfigError(format!(
            "[config].output is required when the graph has {} terminal nodes ({:?})",
            sinks.len(),
            sinks
        ))),
    }
}
