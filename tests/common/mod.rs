#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use levelflow::dag::{Node, NodeId, NodeStatus};
use levelflow::state::{InMemoryState, StateProvider};
use levelflow_test_utils::{ExecutionLog, RecordingExecutor};

/// A node backed by a recording executor.
pub fn node(id: &str, exec: RecordingExecutor) -> Node {
    Node::new(id, exec)
}

/// A node that succeeds immediately with no output.
pub fn quick(id: &str, log: &ExecutionLog) -> Node {
    Node::new(id, RecordingExecutor::new(log))
}

pub fn no_state() -> HashMap<String, serde_json::Value> {
    HashMap::new()
}

/// Fresh in-memory state plus the same value as a trait object, so tests can
/// both hand it to the engine and inspect it afterwards.
pub fn shared_state() -> (Arc<InMemoryState>, Arc<dyn StateProvider>) {
    let state = Arc::new(InMemoryState::new());
    let dynamic: Arc<dyn StateProvider> = state.clone();
    (state, dynamic)
}

pub fn status(state: &InMemoryState, id: &str) -> NodeStatus {
    state.get_node_status(id).unwrap()
}

pub fn ids(names: &[&str]) -> Vec<NodeId> {
    names.iter().map(|s| s.to_string()).collect()
}
