// src/config/mod.rs

//! TOML graph definitions.
//!
//! - [`model`] maps the TOML layout.
//! - [`loader`] reads a file from disk.
//! - [`validate`] checks references, conditions, durations and acyclicity.
//! - [`build`] turns a validated config into a runnable graph.

pub mod build;
pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use build::{build_graph, initial_state, run_config};
pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, ConfigSection, EdgeConfig, NodeConfig, RawConfigFile};
