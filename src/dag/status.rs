// src/dag/status.rs

//! Per-run node status and its transition rules.

use std::fmt;

use serde::Serialize;

/// Per-run state of a node.
///
/// Legal transitions are `Pending -> Running -> {Completed, Failed}` and
/// `Pending -> Skipped`. The three right-hand states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Initialised for this run, not yet dispatched.
    #[default]
    Pending,
    /// Dispatched to its executor.
    Running,
    Completed,
    Failed,
    /// Never ran: a dependency failed or was skipped, no incoming edge was
    /// active, or dispatch was cancelled.
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped
        )
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (NodeStatus::Pending, NodeStatus::Running)
                | (NodeStatus::Pending, NodeStatus::Skipped)
                | (NodeStatus::Running, NodeStatus::Completed)
                | (NodeStatus::Running, NodeStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a node was marked [`NodeStatus::Skipped`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UpstreamFailed(String),
    UpstreamSkipped(String),
    ConditionsNotSatisfied,
    /// The level was cancelled before the node acquired a slot.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamFailed(dep) => write!(f, "dependency '{dep}' failed"),
            SkipReason::UpstreamSkipped(dep) => write!(f, "dependency '{dep}' was skipped"),
            SkipReason::ConditionsNotSatisfied => f.write_str("edge conditions not satisfied"),
            SkipReason::Cancelled => f.write_str("cancelled before dispatch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_final() {
        for terminal in [NodeStatus::Completed, NodeStatus::Failed, NodeStatus::Skipped] {
            assert!(terminal.is_terminal());
            for next in [
                NodeStatus::Pending,
                NodeStatus::Running,
                NodeStatus::Completed,
                NodeStatus::Failed,
                NodeStatus::Skipped,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn skipped_never_passes_through_running() {
        assert!(NodeStatus::Pending.can_transition_to(NodeStatus::Skipped));
        assert!(!NodeStatus::Running.can_transition_to(NodeStatus::Skipped));
        assert!(!NodeStatus::Pending.can_transition_to(NodeStatus::Completed));
    }
}
