#![allow(dead_code)]

use std::collections::BTreeMap;

use levelflow::config::{ConfigFile, ConfigSection, EdgeConfig, NodeConfig, RawConfigFile};
use levelflow::types::{ErrorStrategy, OutputFormat};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                state: BTreeMap::new(),
                node: BTreeMap::new(),
                edge: Vec::new(),
            },
        }
    }

    pub fn with_node(mut self, id: &str, node: NodeConfig) -> Self {
        self.config.node.insert(id.to_string(), node);
        self
    }

    pub fn with_edge(mut self, from: &str, to: &str, when: Option<&str>) -> Self {
        self.config.edge.push(EdgeConfig {
            from: from.to_string(),
            to: to.to_string(),
            when: when.map(str::to_string),
        });
        self
    }

    pub fn with_state(mut self, key: &str, value: serde_json::Value) -> Self {
        self.config.state.insert(key.to_string(), value);
        self
    }

    pub fn output(mut self, id: &str) -> Self {
        self.config.config.output = Some(id.to_string());
        self
    }

    pub fn error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.config.config.error_strategy = strategy;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.config.max_concurrency = n;
        self
    }

    pub fn execution_timeout(mut self, timeout: &str) -> Self {
        self.config.config.execution_timeout = Some(timeout.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `NodeConfig`.
pub struct NodeConfigBuilder {
    node: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            node: NodeConfig {
                cmd: cmd.to_string(),
                after: Vec::new(),
                timeout: None,
                output_format: OutputFormat::default(),
                params: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.node.after.push(dep.to_string());
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.node.timeout = Some(timeout.to_string());
        self
    }

    pub fn json_output(mut self) -> Self {
        self.node.output_format = OutputFormat::Json;
        self
    }

    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.node.params = Some(params);
        self
    }

    pub fn build(self) -> NodeConfig {
        self.node
    }
}
