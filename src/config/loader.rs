// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialise a config file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;
    debug!(path = %path.display(), nodes = config.node.len(), "config file parsed");

    Ok(config)
}

/// Load a config file and validate it: dependencies and edge endpoints
/// resolve, conditions and durations parse, the graph is acyclic and the
/// output node is known.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// `Levelflow.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Levelflow.toml")
}
