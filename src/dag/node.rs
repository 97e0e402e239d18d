// src/dag/node.rs

//! Nodes, their executor capability, and the values flowing between them.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::errors::LevelflowError;
use crate::state::StateProvider;

/// Canonical node identifier type used throughout the engine.
pub type NodeId = String;

/// Opaque per-run resource handed to executors (e.g. an LLM client).
///
/// The scheduler never looks inside it; executors downcast with
/// [`NodeInput::handle_as`].
pub type ExecutionHandle = Arc<dyn Any + Send + Sync>;

/// Future returned by [`NodeExecutor::execute`].
pub type ExecFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<Option<NodeResult>>> + Send + 'a>>;

/// Capability implemented per node type.
///
/// Returning `Ok(None)` is normalised by the runner to an empty result.
/// Long-running executors should watch [`NodeContext::cancelled`].
pub trait NodeExecutor: Send + Sync {
    fn execute(&self, ctx: NodeContext, input: NodeInput) -> ExecFuture<'_>;
}

/// Output of a node, tagged by how it should be decoded.
#[derive(Clone, Default)]
pub enum NodeOutput {
    #[default]
    Empty,
    Json(serde_json::Value),
    /// Raw text; decoded as JSON at projection unless the target is `String`.
    Text(String),
    /// An already-typed value; projected by downcast only.
    Typed {
        value: Arc<dyn Any + Send + Sync>,
        type_name: &'static str,
    },
}

impl NodeOutput {
    pub fn typed<T: Any + Send + Sync>(value: T) -> Self {
        NodeOutput::Typed {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NodeOutput::Empty => "empty",
            NodeOutput::Json(_) => "json",
            NodeOutput::Text(_) => "text",
            NodeOutput::Typed { .. } => "typed value",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, NodeOutput::Empty)
    }

    /// Text rendering used by condition expressions.
    ///
    /// JSON strings render without quotes; typed values have no rendering.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            NodeOutput::Empty | NodeOutput::Typed { .. } => None,
            NodeOutput::Text(s) => Some(Cow::Borrowed(s.as_str())),
            NodeOutput::Json(serde_json::Value::String(s)) => Some(Cow::Borrowed(s.as_str())),
            NodeOutput::Json(other) => Some(Cow::Owned(other.to_string())),
        }
    }
}

impl fmt::Debug for NodeOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOutput::Empty => f.write_str("Empty"),
            NodeOutput::Json(v) => f.debug_tuple("Json").field(v).finish(),
            NodeOutput::Text(s) => f.debug_tuple("Text").field(s).finish(),
            NodeOutput::Typed { type_name, .. } => write!(f, "Typed({type_name})"),
        }
    }
}

/// Token and cost accounting reported by executors that track it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost += other.cost;
    }
}

/// Result of one node execution. Written once per node per run.
#[derive(Debug, Clone, Default)]
pub struct NodeResult {
    pub output: NodeOutput,
    pub error: Option<Arc<LevelflowError>>,
    pub duration: Duration,
    pub usage: Option<Usage>,
}

impl NodeResult {
    pub fn new(output: NodeOutput) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::new(NodeOutput::Json(value))
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::new(NodeOutput::Text(value.into()))
    }

    pub fn typed<T: Any + Send + Sync>(value: T) -> Self {
        Self::new(NodeOutput::typed(value))
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub(crate) fn failed(error: Arc<LevelflowError>, duration: Duration) -> Self {
        Self {
            error: Some(error),
            duration,
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Per-invocation context handed to an executor alongside its input.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub node: NodeId,
    /// Cancelled when the level aborts, the run deadline fires, or the
    /// node's own timeout elapses.
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
}

impl NodeContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Everything an executor may read while running.
#[derive(Clone)]
pub struct NodeInput {
    /// Results of every dependency, keyed by dependency id.
    pub upstream: HashMap<NodeId, Arc<NodeResult>>,
    pub state: Arc<dyn StateProvider>,
    pub params: serde_json::Value,
    pub handle: Option<ExecutionHandle>,
}

impl NodeInput {
    pub fn upstream_output(&self, id: &str) -> Option<&NodeOutput> {
        self.upstream.get(id).map(|r| &r.output)
    }

    pub fn handle_as<H: Any + Send + Sync>(&self) -> Option<&H> {
        self.handle.as_deref().and_then(|h| h.downcast_ref::<H>())
    }
}

impl fmt::Debug for NodeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInput")
            .field("upstream", &self.upstream)
            .field("params", &self.params)
            .field("has_handle", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

/// A unit of work in the graph. Immutable once the graph is built.
#[derive(Clone)]
pub struct Node {
    pub id: NodeId,
    /// All required before this node may run.
    pub dependencies: Vec<NodeId>,
    pub executor: Arc<dyn NodeExecutor>,
    pub params: serde_json::Value,
    pub timeout: Option<Duration>,
    /// Overrides the graph's default execution handle.
    pub handle: Option<ExecutionHandle>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, executor: impl NodeExecutor + 'static) -> Self {
        Self::from_arc(id, Arc::new(executor))
    }

    pub fn from_arc(id: impl Into<NodeId>, executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            executor,
            params: serde_json::Value::Null,
            timeout: None,
            handle: None,
        }
    }

    pub fn after(mut self, dep: impl Into<NodeId>) -> Self {
        let dep = dep.into();
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_handle(mut self, handle: ExecutionHandle) -> Self {
        self.handle = Some(handle);
        self
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("params", &self.params)
            .field("timeout", &self.timeout)
            .field("has_handle", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_rendering_strips_json_string_quotes() {
        let out = NodeOutput::Json(serde_json::json!("ok"));
        assert_eq!(out.as_text().as_deref(), Some("ok"));

        let out = NodeOutput::Json(serde_json::json!({"a": 1}));
        assert_eq!(out.as_text().as_deref(), Some(r#"{"a":1}"#));

        assert!(NodeOutput::typed(5u8).as_text().is_none());
        assert!(NodeOutput::Empty.as_text().is_none());
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(&Usage {
            input_tokens: 10,
            output_tokens: 4,
            cost: 0.5,
        });
        total.add(&Usage {
            input_tokens: 1,
            output_tokens: 1,
            cost: 0.25,
        });
        assert_eq!(total.input_tokens, 11);
        assert_eq!(total.output_tokens, 5);
        assert!((total.cost - 0.75).abs() < f64::EPSILON);
    }
}
