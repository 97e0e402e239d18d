// src/dag/edge.rs

//! Edges and the conditions that gate them.

use std::fmt;
use std::sync::Arc;

use crate::dag::node::{NodeId, NodeOutput};
use crate::errors::{LevelflowError, Result};
use crate::state::StateProvider;

/// Predicate over the source node's output and the shared state.
pub type EdgeCondition = Arc<dyn Fn(&NodeOutput, &dyn StateProvider) -> bool + Send + Sync>;

/// A dependency link `from -> to`. Without a condition the edge is always
/// active.
#[derive(Clone)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub condition: Option<EdgeCondition>,
}

impl Edge {
    /// Create an unconditional edge.
    pub fn always(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    /// Create an edge gated by `condition`.
    pub fn when<F>(from: impl Into<NodeId>, to: impl Into<NodeId>, condition: F) -> Self
    where
        F: Fn(&NodeOutput, &dyn StateProvider) -> bool + Send + Sync + 'static,
    {
        Self {
            from: from.into(),
            to: to.into(),
            condition: Some(Arc::new(condition)),
        }
    }

    /// Whether this edge lets its target run, given the source output.
    pub fn is_active(&self, source_output: &NodeOutput, state: &dyn StateProvider) -> bool {
        match &self.condition {
            None => true,
            Some(cond) => cond(source_output, state),
        }
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

/// Left-hand side of a condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// The source node's output rendered as text.
    Output,
    /// A string value from the shared state.
    State(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    NotEquals,
    Contains,
}

/// Parsed form of the small expression language used by config-defined
/// edges.
///
/// Supported:
/// - `output == "value"` / `state.key == "value"`
/// - `output != "value"`
/// - `output contains "substr"`
///
/// A bare key (`status == "ok"`) is shorthand for `state.status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionExpr {
    pub operand: Operand,
    pub comparison: Comparison,
    pub value: String,
}

impl ConditionExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();

        let parsed = [
            (" contains ", Comparison::Contains),
            ("!=", Comparison::NotEquals),
            ("==", Comparison::Equals),
        ]
        .into_iter()
        .find_map(|(op, cmp)| split_operator(expr, op).map(|(l, r)| (l, cmp, r)));

        let Some((lhs, comparison, rhs)) = parsed else {
            return Err(LevelflowError::ConfigError(format!(
                "unsupported condition expression: {expr}"
            )));
        };

        let operand = match lhs {
            "output" => Operand::Output,
            other => {
                let key = other.strip_prefix("state.").unwrap_or(other);
                if key.is_empty() {
                    return Err(LevelflowError::ConfigError(format!(
                        "condition expression has an empty key: {expr}"
                    )));
                }
                Operand::State(key.to_string())
            }
        };

        Ok(Self {
            operand,
            comparison,
            value: rhs.to_string(),
        })
    }

    pub fn evaluate(&self, output: &NodeOutput, state: &dyn StateProvider) -> bool {
        let subject: Option<String> = match &self.operand {
            Operand::Output => output.as_text().map(|s| s.into_owned()),
            Operand::State(key) => state.get(key).map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
        };

        let Some(subject) = subject else {
            return false;
        };

        match self.comparison {
            Comparison::Equals => subject.trim() == self.value,
            Comparison::NotEquals => subject.trim() != self.value,
            Comparison::Contains => subject.contains(&self.value),
        }
    }

    /// Turn the expression into an [`EdgeCondition`].
    pub fn into_condition(self) -> EdgeCondition {
        Arc::new(move |output, state| self.evaluate(output, state))
    }
}

/// Parse `lhs OP "value"`, returning (lhs, value).
fn split_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let (lhs, rhs) = expr.split_once(op)?;
    let lhs = lhs.trim();
    let rhs = rhs.trim();
    if lhs.is_empty() || rhs.len() < 2 || !rhs.starts_with('"') || !rhs.ends_with('"') {
        return None;
    }
    Some((lhs, &rhs[1..rhs.len() - 1]))
}
