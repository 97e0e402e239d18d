// src/engine/readiness.rs

//! Decides which nodes of a level may run now.

use tracing::{debug, warn};

use crate::dag::{Graph, NodeId, NodeOutput, NodeStatus, SkipReason};
use crate::errors::Result;
use crate::state::StateProvider;

/// Outcome of filtering one level.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Readiness {
    /// Nodes to dispatch in this level.
    pub ready: Vec<NodeId>,
    /// Nodes marked `Skipped` by this call, with the reason.
    pub skipped: Vec<(NodeId, SkipReason)>,
    /// Nodes with a non-terminal dependency. They stay `Pending`.
    pub waiting: Vec<NodeId>,
}

enum Verdict {
    Ready,
    Skip(SkipReason),
    Wait,
}

/// Applies dependency gating, skip propagation and edge conditions.
pub struct ReadinessFilter<'a, T> {
    graph: &'a Graph<T>,
    state: &'a dyn StateProvider,
}

impl<'a, T> ReadinessFilter<'a, T> {
    pub fn new(graph: &'a Graph<T>, state: &'a dyn StateProvider) -> Self {
        Self { graph, state }
    }

    /// Classify every node in `level`. Nodes that can never run are marked
    /// `Skipped` in the state as a side effect.
    pub fn filter(&self, level: &[NodeId]) -> Result<Readiness> {
        let mut readiness = Readiness::default();

        for id in level {
            let own = self.state.get_node_status(id)?;
            if own != NodeStatus::Pending {
                debug!(node = %id, status = %own, "node already left Pending; not dispatching");
                continue;
            }

            match self.verdict(id)? {
                Verdict::Ready => readiness.ready.push(id.clone()),
                Verdict::Skip(reason) => {
                    self.state.set_node_status(id, NodeStatus::Skipped)?;
                    debug!(node = %id, reason = %reason, "node skipped");
                    self.graph.hooks.on_node_skipped(id, &reason);
                    readiness.skipped.push((id.clone(), reason));
                }
                Verdict::Wait => {
                    warn!(
                        node = %id,
                        "dependency not terminal when its level started; leaving node Pending"
                    );
                    readiness.waiting.push(id.clone());
                }
            }
        }

        Ok(readiness)
    }

    fn verdict(&self, id: &str) -> Result<Verdict> {
        let mut waiting = false;

        for dep in self.graph.dependencies_of(id) {
            match self.state.get_node_status(dep)? {
                NodeStatus::Completed => {}
                NodeStatus::Failed => return Ok(Verdict::Skip(SkipReason::UpstreamFailed(dep.clone()))),
                NodeStatus::Skipped => {
                    return Ok(Verdict::Skip(SkipReason::UpstreamSkipped(dep.clone())));
                }
                NodeStatus::Pending | NodeStatus::Running => waiting = true,
            }
        }

        if waiting {
            return Ok(Verdict::Wait);
        }

        // A dependency declared without an edge is an unconditional link.
        let incoming: Vec<_> = self.graph.incoming_edges(id).collect();
        let plain_dependency = self
            .graph
            .dependencies_of(id)
            .iter()
            .any(|dep| !incoming.iter().any(|edge| &edge.from == dep));
        if incoming.is_empty() || plain_dependency {
            return Ok(Verdict::Ready);
        }

        for edge in incoming {
            let source = self.state.get_node_result(&edge.from)?;
            let active = match source.as_deref() {
                Some(result) => edge.is_active(&result.output, self.state),
                None => edge.is_active(&NodeOutput::Empty, self.state),
            };
            if active {
                return Ok(Verdict::Ready);
            }
        }

        Ok(Verdict::Skip(SkipReason::ConditionsNotSatisfied))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dag::{Edge, Node, NodeResult};
    use crate::exec::FnExecutor;
    use crate::state::InMemoryState;

    fn noop(id: &str) -> Node {
        Node::new(id, FnExecutor::new(|_ctx, _input| async { Ok(None) }))
    }

    fn complete(state: &InMemoryState, id: &str, result: NodeResult) {
        state.set_node_status(id, NodeStatus::Running).unwrap();
        state
            .record_outcome(id, Arc::new(result), NodeStatus::Completed)
            .unwrap();
    }

    fn init(state: &InMemoryState, graph: &Graph<()>) {
        let ids: Vec<NodeId> = graph.node_ids().map(str::to_string).collect();
        state.initialize_nodes(&ids).unwrap();
    }

    #[test]
    fn roots_are_ready() {
        let graph: Graph<()> = Graph::builder("a").node(noop("a")).build().unwrap();
        let state = InMemoryState::new();
        init(&state, &graph);

        let r = ReadinessFilter::new(&graph, &state).filter(&graph.levels()[0]).unwrap();
        assert_eq!(r.ready, vec!["a".to_string()]);
        assert!(r.skipped.is_empty());
    }

    #[test]
    fn failed_dependency_skips_dependent() {
        let graph: Graph<()> = Graph::builder("b")
            .node(noop("a"))
            .node(noop("b").after("a"))
            .build()
            .unwrap();
        let state = InMemoryState::new();
        init(&state, &graph);
        state.set_node_status("a", NodeStatus::Running).unwrap();
        state.set_node_status("a", NodeStatus::Failed).unwrap();

        let r = ReadinessFilter::new(&graph, &state).filter(&graph.levels()[1]).unwrap();
        assert!(r.ready.is_empty());
        assert_eq!(
            r.skipped,
            vec![("b".to_string(), SkipReason::UpstreamFailed("a".into()))]
        );
        assert_eq!(state.get_node_status("b").unwrap(), NodeStatus::Skipped);
    }

    #[test]
    fn false_condition_skips_and_any_active_edge_is_enough() {
        let graph: Graph<()> = Graph::builder("c")
            .node(noop("a"))
            .node(noop("b"))
            .node(noop("c"))
            .node(noop("d"))
            .edge(Edge::when("a", "c", |_, _| false))
            .edge(Edge::always("b", "c"))
            .edge(Edge::when("a", "d", |out, _| {
                out.as_text().is_some_and(|t| t == "yes")
            }))
            .build()
            .unwrap();
        let state = InMemoryState::new();
        init(&state, &graph);
        complete(&state, "a", NodeResult::text("no"));
        complete(&state, "b", NodeResult::default());

        let r = ReadinessFilter::new(&graph, &state).filter(&graph.levels()[1]).unwrap();
        assert_eq!(r.ready, vec!["c".to_string()]);
        assert_eq!(
            r.skipped,
            vec![("d".to_string(), SkipReason::ConditionsNotSatisfied)]
        );
    }

    #[test]
    fn plain_dependency_counts_as_an_active_edge() {
        let graph: Graph<()> = Graph::builder("c")
            .node(noop("a"))
            .node(noop("b"))
            .node(noop("c").after("a"))
            .edge(Edge::when("b", "c", |_, _| false))
            .build()
            .unwrap();
        let state = InMemoryState::new();
        init(&state, &graph);
        complete(&state, "a", NodeResult::default());
        complete(&state, "b", NodeResult::default());

        let r = ReadinessFilter::new(&graph, &state).filter(&graph.levels()[1]).unwrap();
        assert_eq!(r.ready, vec!["c".to_string()]);
        assert!(r.skipped.is_empty());
    }

    #[test]
    fn pending_dependency_waits() {
        let graph: Graph<()> = Graph::builder("b")
            .node(noop("a"))
            .node(noop("b").after("a"))
            .build()
            .unwrap();
        let state = InMemoryState::new();
        init(&state, &graph);

        let r = ReadinessFilter::new(&graph, &state).filter(&graph.levels()[1]).unwrap();
        assert_eq!(r.waiting, vec!["b".to_string()]);
        assert_eq!(state.get_node_status("b").unwrap(), NodeStatus::Pending);
    }
}
