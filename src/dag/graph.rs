// src/dag/graph.rs

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::edge::Edge;
use crate::dag::node::{ExecutionHandle, Node, NodeId};
use crate::engine::hooks::{ExecutionHooks, NoopHooks};
use crate::errors::{LevelflowError, Result};
use crate::types::ErrorStrategy;

/// Run-wide execution settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunConfig {
    /// Maximum simultaneously running nodes within one level; `0` means
    /// unbounded.
    pub max_concurrency: usize,
    pub error_strategy: ErrorStrategy,
    /// Deadline for the whole run.
    pub execution_timeout: Option<Duration>,
}

/// Immutable execution graph whose output node decodes into `T`.
///
/// Levels are an ordered partition of all node ids such that every
/// dependency of a node lives in a strictly earlier level. [`GraphBuilder`]
/// either checks that invariant for explicit levels or computes the levels
/// itself.
pub struct Graph<T> {
    pub(crate) nodes: HashMap<NodeId, Arc<Node>>,
    pub(crate) edges: Vec<Edge>,
    /// Indices into `edges`, keyed by target node.
    pub(crate) incoming: HashMap<NodeId, Vec<usize>>,
    pub(crate) dependents: HashMap<NodeId, Vec<NodeId>>,
    pub(crate) levels: Vec<Vec<NodeId>>,
    pub(crate) output_node: NodeId,
    pub(crate) default_handle: Option<ExecutionHandle>,
    pub(crate) config: RunConfig,
    pub(crate) hooks: Arc<dyn ExecutionHooks>,
    _output: PhantomData<fn() -> T>,
}

impl<T> Graph<T> {
    pub fn builder(output_node: impl Into<NodeId>) -> GraphBuilder<T> {
        GraphBuilder::new(output_node)
    }

    /// Return all node ids in level order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.levels.iter().flatten().map(|s| s.as_str())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id).map(|n| n.as_ref())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn output_node(&self) -> &str {
        &self.output_node
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Immediate dependencies of a node.
    pub fn dependencies_of(&self, id: &str) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a node.
    pub fn dependents_of(&self, id: &str) -> &[NodeId] {
        self.dependents
            .get(id)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }

    /// Edges whose target is `id`.
    pub fn incoming_edges(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }
}

impl<T> fmt::Debug for Graph<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("levels", &self.levels)
            .field("edges", &self.edges)
            .field("output_node", &self.output_node)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Assembles and validates a [`Graph`].
///
/// Edges imply dependencies: `Edge { from: "a", to: "b" }` makes `a` a
/// dependency of `b` even if the node did not list it.
pub struct GraphBuilder<T> {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    levels: Option<Vec<Vec<NodeId>>>,
    output_node: NodeId,
    default_handle: Option<ExecutionHandle>,
    config: RunConfig,
    hooks: Arc<dyn ExecutionHooks>,
    _output: PhantomData<fn() -> T>,
}

impl<T> GraphBuilder<T> {
    pub fn new(output_node: impl Into<NodeId>) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            levels: None,
            output_node: output_node.into(),
            default_handle: None,
            config: RunConfig::default(),
            hooks: Arc::new(NoopHooks),
            _output: PhantomData,
        }
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Use explicit levels instead of computing them.
    pub fn levels(mut self, levels: Vec<Vec<NodeId>>) -> Self {
        self.levels = Some(levels);
        self
    }

    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = n;
        self
    }

    pub fn error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.config.error_strategy = strategy;
        self
    }

    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.config.execution_timeout = Some(timeout);
        self
    }

    pub fn default_handle(mut self, handle: ExecutionHandle) -> Self {
        self.default_handle = Some(handle);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn build(self) -> Result<Graph<T>> {
        let mut nodes: HashMap<NodeId, Node> = HashMap::new();
        for node in self.nodes {
            if nodes.contains_key(&node.id) {
                return Err(LevelflowError::InvalidGraph(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            nodes.insert(node.id.clone(), node);
        }

        // Edges imply dependencies.
        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (idx, edge) in self.edges.iter().enumerate() {
            if !nodes.contains_key(&edge.from) {
                return Err(LevelflowError::InvalidGraph(format!(
                    "edge {} -> {} references unknown source node",
                    edge.from, edge.to
                )));
            }
            let Some(target) = nodes.get_mut(&edge.to) else {
                return Err(LevelflowError::InvalidGraph(format!(
                    "edge {} -> {} references unknown target node",
                    edge.from, edge.to
                )));
            };
            if !target.dependencies.contains(&edge.from) {
                target.dependencies.push(edge.from.clone());
            }
            incoming.entry(edge.to.clone()).or_default().push(idx);
        }

        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node in nodes.values() {
            for dep in &node.dependencies {
                if dep == &node.id {
                    return Err(LevelflowError::InvalidGraph(format!(
                        "node '{}' cannot depend on itself",
                        node.id
                    )));
                }
                if !nodes.contains_key(dep) {
                    return Err(LevelflowError::InvalidGraph(format!(
                        "node '{}' has unknown dependency '{}'",
                        node.id, dep
                    )));
                }
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(node.id.clone());
            }
        }

        if !nodes.contains_key(&self.output_node) {
            return Err(LevelflowError::InvalidGraph(format!(
                "output node '{}' is not part of the graph",
                self.output_node
            )));
        }

        let deps: HashMap<&str, &[NodeId]> = nodes
            .iter()
            .map(|(id, n)| (id.as_str(), n.dependencies.as_slice()))
            .collect();
        let levels = match self.levels {
            Some(levels) => {
                check_levels(&deps, &levels)?;
                levels
            }
            None => compute_levels(&deps)?,
        };

        Ok(Graph {
            nodes: nodes.into_iter().map(|(id, n)| (id, Arc::new(n))).collect(),
            edges: self.edges,
            incoming,
            dependents,
            levels,
            output_node: self.output_node,
            default_handle: self.default_handle,
            config: self.config,
            hooks: self.hooks,
            _output: PhantomData,
        })
    }
}

/// Compute topological levels: a node's level is one past the deepest of its
/// dependencies. Ids within a level are sorted for stable output.
pub fn compute_levels(deps: &HashMap<&str, &[NodeId]>) -> Result<Vec<Vec<NodeId>>> {
    // Edge direction: dep -> node.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for &id in deps.keys() {
        graph.add_node(id);
    }
    for (&id, node_deps) in deps {
        for dep in node_deps.iter() {
            graph.add_edge(dep.as_str(), id, ());
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        LevelflowError::DagCycle(format!(
            "cycle detected in node graph involving node '{}'",
            cycle.node_id()
        ))
    })?;

    let mut depth: HashMap<&str, usize> = HashMap::new();
    let mut levels: Vec<Vec<NodeId>> = Vec::new();
    for id in order {
        let d = deps
            .get(id)
            .into_iter()
            .flat_map(|ds| ds.iter())
            .filter_map(|dep| depth.get(dep.as_str()))
            .map(|d| d + 1)
            .max()
            .unwrap_or(0);
        depth.insert(id, d);
        if levels.len() <= d {
            levels.resize_with(d + 1, Vec::new);
        }
        levels[d].push(id.to_string());
    }

    for level in &mut levels {
        level.sort();
    }
    Ok(levels)
}

/// Check that explicit levels partition the nodes and respect dependencies.
fn check_levels(deps: &HashMap<&str, &[NodeId]>, levels: &[Vec<NodeId>]) -> Result<()> {
    let mut level_of: HashMap<&str, usize> = HashMap::new();
    for (idx, level) in levels.iter().enumerate() {
        for id in level {
            if !deps.contains_key(id.as_str()) {
                return Err(LevelflowError::InvalidGraph(format!(
                    "level {idx} references unknown node '{id}'"
                )));
            }
            if level_of.insert(id.as_str(), idx).is_some() {
                return Err(LevelflowError::InvalidGraph(format!(
                    "node '{id}' appears in more than one level"
                )));
            }
        }
    }

    let missing: HashSet<&str> = deps
        .keys()
        .copied()
        .filter(|id| !level_of.contains_key(id))
        .collect();
    if let Some(id) = missing.iter().next() {
        return Err(LevelflowError::InvalidGraph(format!(
            "node '{id}' is not assigned to any level"
        )));
    }

    for (&id, node_deps) in deps {
        let own = level_of[id];
        for dep in node_deps.iter() {
            if level_of[dep.as_str()] >= own {
                return Err(LevelflowError::InvalidGraph(format!(
                    "node '{id}' in level {own} depends on '{dep}' which is not in an earlier level"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::FnExecutor;

    fn noop(id: &str) -> Node {
        Node::new(id, FnExecutor::new(|_ctx, _input| async { Ok(None) }))
    }

    #[test]
    fn computes_diamond_levels() {
        let graph: Graph<()> = Graph::builder("D")
            .node(noop("A"))
            .node(noop("B"))
            .node(noop("C"))
            .node(noop("D"))
            .edge(Edge::always("A", "B"))
            .edge(Edge::always("A", "C"))
            .edge(Edge::always("B", "D"))
            .edge(Edge::always("C", "D"))
            .build()
            .unwrap();

        assert_eq!(
            graph.levels(),
            &[vec!["A".to_string()], vec!["B".into(), "C".into()], vec!["D".into()]]
        );
        assert_eq!(graph.dependencies_of("D").len(), 2);
        assert_eq!(graph.dependents_of("A").len(), 2);
        assert_eq!(graph.incoming_edges("D").count(), 2);
    }

    #[test]
    fn rejects_level_that_breaks_dependency_order() {
        let result: Result<Graph<()>> = Graph::builder("B")
            .node(noop("A"))
            .node(noop("B").after("A"))
            .levels(vec![vec!["A".into(), "B".into()]])
            .build();

        match result {
            Err(LevelflowError::InvalidGraph(msg)) => assert!(msg.contains("earlier level")),
            other => panic!("expected InvalidGraph, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_output_node() {
        let result: Result<Graph<()>> = Graph::builder("missing").node(noop("A")).build();
        assert!(matches!(result, Err(LevelflowError::InvalidGraph(_))));
    }

    #[test]
    fn detects_cycles() {
        let result: Result<Graph<()>> = Graph::builder("A")
            .node(noop("A").after("B"))
            .node(noop("B").after("A"))
            .build();
        assert!(matches!(result, Err(LevelflowError::DagCycle(_))));
    }

    #[test]
    fn rejects_duplicate_ids_and_partial_levels() {
        let result: Result<Graph<()>> = Graph::builder("A").node(noop("A")).node(noop("A")).build();
        assert!(matches!(result, Err(LevelflowError::InvalidGraph(_))));

        let result: Result<Graph<()>> = Graph::builder("A")
            .node(noop("A"))
            .node(noop("B"))
            .levels(vec![vec!["A".into()]])
            .build();
        assert!(matches!(result, Err(LevelflowError::InvalidGraph(_))));
    }
}
