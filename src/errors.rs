// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Every failure the engine can report maps onto one variant here. Skips are
//! not errors; they are only visible through the final node status.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::dag::NodeId;

#[derive(Error, Debug)]
pub enum LevelflowError {
    /// Seeding the shared state or node statuses failed before any node ran.
    #[error("state initialisation failed: {0}")]
    StateInit(String),

    /// A state provider operation failed (e.g. a poisoned lock).
    #[error("state provider error: {0}")]
    State(String),

    #[error("invalid status transition for node '{node}': {from} -> {to}")]
    InvalidTransition {
        node: NodeId,
        from: &'static str,
        to: &'static str,
    },

    /// The node input could not be assembled.
    #[error("could not assemble input for node '{node}': {reason}")]
    Assembly { node: NodeId, reason: String },

    /// The node executor itself returned an error.
    #[error("node '{node}' failed: {source:#}")]
    NodeExecution {
        node: NodeId,
        #[source]
        source: anyhow::Error,
    },

    #[error("node '{node}' timed out after {timeout:?}")]
    NodeTimeout { node: NodeId, timeout: Duration },

    #[error("run timed out after {timeout:?} before completing level {level}")]
    RunTimeout { level: usize, timeout: Duration },

    #[error("execution cancelled at {scope}")]
    Cancelled { scope: String },

    /// Fail-fast wrapper around the first node error collected in a level.
    #[error("level {level} aborted: node '{node}' failed")]
    NodeFailed {
        node: NodeId,
        level: usize,
        #[source]
        source: Arc<LevelflowError>,
    },

    /// The designated output node carries an error.
    #[error("output node '{node}' failed")]
    OutputNodeFailed {
        node: NodeId,
        #[source]
        source: Arc<LevelflowError>,
    },

    #[error("output node '{node}' produced no result to decode")]
    MissingOutput { node: NodeId },

    #[error("output node '{node}' type mismatch: expected {expected}, found {actual}")]
    OutputTypeMismatch {
        node: NodeId,
        expected: &'static str,
        actual: String,
    },

    #[error("output node '{node}' could not be decoded into {expected}: {source}")]
    OutputDecode {
        node: NodeId,
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LevelflowError {
    /// Whether this error came from a run-level or node-level deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            LevelflowError::NodeTimeout { .. } | LevelflowError::RunTimeout { .. } => true,
            LevelflowError::NodeFailed { source, .. }
            | LevelflowError::OutputNodeFailed { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Whether this error reports a problem with the designated output node.
    pub fn is_output_projection(&self) -> bool {
        matches!(
            self,
            LevelflowError::OutputNodeFailed { .. }
                | LevelflowError::MissingOutput { .. }
                | LevelflowError::OutputTypeMismatch { .. }
                | LevelflowError::OutputDecode { .. }
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, LevelflowError>;
