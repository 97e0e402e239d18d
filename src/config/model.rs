// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::{ErrorStrategy, OutputFormat};

/// Configuration exactly as read from TOML, before validation.
///
/// ```toml
/// [config]
/// max_concurrency = 2
/// error_strategy = "continue_on_error"
/// execution_timeout = "30s"
/// output = "report"
///
/// [state]
/// topic = "rust"
///
/// [node.fetch]
/// cmd = "echo fetched"
///
/// [node.report]
/// cmd = "echo \"$LEVELFLOW_DEP_FETCH\""
/// after = ["fetch"]
///
/// [[edge]]
/// from = "fetch"
/// to = "report"
/// when = 'output contains "fetched"'
/// ```
///
/// All sections are optional for deserialisation; validation requires at
/// least one node.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Initial shared state.
    #[serde(default)]
    pub state: BTreeMap<String, serde_json::Value>,

    /// Nodes from `[node.<id>]`, keyed by node id.
    #[serde(default)]
    pub node: BTreeMap<String, NodeConfig>,

    /// Optional `[[edge]]` tables.
    #[serde(default)]
    pub edge: Vec<EdgeConfig>,
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>`, so the dependency
/// graph is acyclic, every reference resolves and `output` names a node.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub state: BTreeMap<String, serde_json::Value>,
    pub node: BTreeMap<String, NodeConfig>,
    pub edge: Vec<EdgeConfig>,
    /// Resolved output node id.
    pub output: String,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile, output: String) -> Self {
        Self {
            config: raw.config,
            state: raw.state,
            node: raw.node,
            edge: raw.edge,
            output,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigSection {
    /// Per-level bound on running nodes; `0` means unbounded.
    #[serde(default)]
    pub max_concurrency: usize,

    #[serde(default)]
    pub error_strategy: ErrorStrategy,

    /// Whole-run deadline, e.g. `"30s"`.
    #[serde(default)]
    pub execution_timeout: Option<String>,

    /// Output node. When omitted, the single node nothing depends on.
    #[serde(default)]
    pub output: Option<String>,
}

/// `[node.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Shell command to execute.
    pub cmd: String,

    /// Dependencies: this node waits for all of them.
    #[serde(default)]
    pub after: Vec<String>,

    /// Node deadline, e.g. `"500ms"`.
    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub output_format: OutputFormat,

    /// Opaque params, passed to the command as `LEVELFLOW_PARAMS`.
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

/// `[[edge]]` table. An edge also makes `from` a dependency of `to`.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfig {
    pub from: String,
    pub to: String,

    /// Condition expression; absent means always active.
    #[serde(default)]
    pub when: Option<String>,
}
