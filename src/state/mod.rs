// src/state/mod.rs

//! Shared run state.
//!
//! A [`StateProvider`] stores the shared key/value bag and, per node, the
//! status and result of the current run. It is the only resource touched by
//! concurrently running nodes, so every implementation supplies its own
//! locking; the scheduler never wraps calls in an external lock.
//!
//! [`InMemoryState`] is the default implementation.

mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use crate::dag::{NodeId, NodeResult, NodeStatus};
use crate::errors::Result;

pub use memory::InMemoryState;

/// Contract for the per-run state store. Every call is individually atomic
/// and must not block indefinitely.
pub trait StateProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;

    fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Copy of the whole shared key/value bag.
    fn shared(&self) -> HashMap<String, serde_json::Value>;

    fn get_node_status(&self, id: &str) -> Result<NodeStatus>;

    /// Move a node to `status`; illegal transitions are rejected.
    fn set_node_status(&self, id: &str, status: NodeStatus) -> Result<()>;

    /// `Ok(None)` while the node has not produced a result yet.
    fn get_node_result(&self, id: &str) -> Result<Option<Arc<NodeResult>>>;

    /// Store a node's result. A result is written at most once per run.
    fn set_node_result(&self, id: &str, result: Arc<NodeResult>) -> Result<()>;

    /// Put one node back to `Pending` and drop its result.
    fn reset_node(&self, id: &str) -> Result<()>;

    /// Drop every shared key and every node record.
    fn clear(&self) -> Result<()>;

    /// Bulk-initialise `ids` to `Pending`.
    fn initialize_nodes(&self, ids: &[NodeId]) -> Result<()> {
        for id in ids {
            self.reset_node(id)?;
        }
        Ok(())
    }

    /// Write a result and its terminal status. Implementations with a single
    /// lock should make the pair atomic.
    fn record_outcome(&self, id: &str, result: Arc<NodeResult>, status: NodeStatus) -> Result<()> {
        self.set_node_result(id, result)?;
        self.set_node_status(id, status)
    }
}
