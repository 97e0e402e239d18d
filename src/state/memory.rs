// src/state/memory.rs

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::dag::{NodeId, NodeResult, NodeStatus};
use crate::errors::{LevelflowError, Result};
use crate::state::StateProvider;

#[derive(Debug, Default)]
struct NodeRecord {
    status: NodeStatus,
    result: Option<Arc<NodeResult>>,
}

/// Default [`StateProvider`]: two lock-guarded maps.
///
/// The shared bag and the node records have separate locks, so edge
/// conditions reading shared state never contend with status writes.
#[derive(Debug, Default)]
pub struct InMemoryState {
    shared: RwLock<HashMap<String, serde_json::Value>>,
    nodes: RwLock<HashMap<NodeId, NodeRecord>>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every node's status.
    pub fn statuses(&self) -> HashMap<NodeId, NodeStatus> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, rec)| (id.clone(), rec.status))
            .collect()
    }
}

fn unknown_node(id: &str) -> LevelflowError {
    LevelflowError::State(format!("unknown node '{id}'"))
}

fn check_transition(id: &str, from: NodeStatus, to: NodeStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(LevelflowError::InvalidTransition {
            node: id.to_string(),
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

impl StateProvider for InMemoryState {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.shared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.shared
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }

    fn shared(&self) -> HashMap<String, serde_json::Value> {
        self.shared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn get_node_status(&self, id: &str) -> Result<NodeStatus> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|rec| rec.status)
            .ok_or_else(|| unknown_node(id))
    }

    fn set_node_status(&self, id: &str, status: NodeStatus) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let rec = nodes.get_mut(id).ok_or_else(|| unknown_node(id))?;
        check_transition(id, rec.status, status)?;
        debug!(node = %id, from = %rec.status, to = %status, "node status changed");
        rec.status = status;
        Ok(())
    }

    fn get_node_result(&self, id: &str) -> Result<Option<Arc<NodeResult>>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|rec| rec.result.clone())
            .ok_or_else(|| unknown_node(id))
    }

    fn set_node_result(&self, id: &str, result: Arc<NodeResult>) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let rec = nodes.get_mut(id).ok_or_else(|| unknown_node(id))?;
        if rec.result.is_some() {
            return Err(LevelflowError::State(format!(
                "result for node '{id}' was already written in this run"
            )));
        }
        rec.result = Some(result);
        Ok(())
    }

    fn reset_node(&self, id: &str) -> Result<()> {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), NodeRecord::default());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.shared
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    fn initialize_nodes(&self, ids: &[NodeId]) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            nodes.insert(id.clone(), NodeRecord::default());
        }
        Ok(())
    }

    fn record_outcome(&self, id: &str, result: Arc<NodeResult>, status: NodeStatus) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let rec = nodes.get_mut(id).ok_or_else(|| unknown_node(id))?;
        check_transition(id, rec.status, status)?;
        if rec.result.is_some() {
            return Err(LevelflowError::State(format!(
                "result for node '{id}' was already written in this run"
            )));
        }
        rec.result = Some(result);
        rec.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialised(ids: &[&str]) -> InMemoryState {
        let state = InMemoryState::new();
        let ids: Vec<NodeId> = ids.iter().map(|s| s.to_string()).collect();
        state.initialize_nodes(&ids).unwrap();
        state
    }

    #[test]
    fn shared_values_round_trip() {
        let state = InMemoryState::new();
        state.set("topic", serde_json::json!("rust")).unwrap();
        assert_eq!(state.get("topic"), Some(serde_json::json!("rust")));
        assert_eq!(state.get("missing"), None);
        assert_eq!(state.shared().len(), 1);
    }

    #[test]
    fn enforces_status_transitions() {
        let state = initialised(&["a"]);
        assert_eq!(state.get_node_status("a").unwrap(), NodeStatus::Pending);

        assert!(matches!(
            state.set_node_status("a", NodeStatus::Completed),
            Err(LevelflowError::InvalidTransition { .. })
        ));

        state.set_node_status("a", NodeStatus::Running).unwrap();
        state.set_node_status("a", NodeStatus::Failed).unwrap();
        assert!(state.set_node_status("a", NodeStatus::Running).is_err());
        assert_eq!(state.get_node_status("a").unwrap(), NodeStatus::Failed);
    }

    #[test]
    fn result_is_written_once() {
        let state = initialised(&["a"]);
        assert!(state.get_node_result("a").unwrap().is_none());

        state
            .set_node_result("a", Arc::new(NodeResult::text("one")))
            .unwrap();
        assert!(state
            .set_node_result("a", Arc::new(NodeResult::text("two")))
            .is_err());
    }

    #[test]
    fn record_outcome_writes_result_and_status_together() {
        let state = initialised(&["a"]);
        state.set_node_status("a", NodeStatus::Running).unwrap();
        state
            .record_outcome("a", Arc::new(NodeResult::text("ok")), NodeStatus::Completed)
            .unwrap();

        assert_eq!(state.get_node_status("a").unwrap(), NodeStatus::Completed);
        assert!(state.get_node_result("a").unwrap().is_some());
    }

    #[test]
    fn unknown_nodes_are_errors() {
        let state = InMemoryState::new();
        assert!(state.get_node_status("ghost").is_err());
        assert!(state.set_node_status("ghost", NodeStatus::Running).is_err());
        assert!(state.get_node_result("ghost").is_err());
    }

    #[test]
    fn poisoned_lock_keeps_serving_records() {
        let state = initialised(&["a"]);
        std::thread::scope(|s| {
            let joined = s
                .spawn(|| {
                    let _guard = state.nodes.write().unwrap();
                    panic!("executor panicked while holding the lock");
                })
                .join();
            assert!(joined.is_err());
        });
        assert!(state.nodes.is_poisoned());

        state.set_node_status("a", NodeStatus::Running).unwrap();
        assert_eq!(state.get_node_status("a").unwrap(), NodeStatus::Running);
    }

    #[test]
    fn initialize_resets_previous_run() {
        let state = initialised(&["a"]);
        state.set_node_status("a", NodeStatus::Skipped).unwrap();

        state.initialize_nodes(&["a".to_string()]).unwrap();
        assert_eq!(state.get_node_status("a").unwrap(), NodeStatus::Pending);
        assert_eq!(state.statuses().len(), 1);

        state.clear().unwrap();
        assert!(state.statuses().is_empty());
    }
}
