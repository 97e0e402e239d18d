// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::ErrorStrategy;

/// Command-line arguments for `levelflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "levelflow",
    version,
    about = "Run a DAG of shell commands level by level with bounded parallelism.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the graph definition (TOML).
    #[arg(long, value_name = "PATH", default_value = "Levelflow.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LEVELFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the levels, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Override `[config].max_concurrency` (0 = unbounded).
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Override `[config].error_strategy` (fail_fast, continue_on_error).
    #[arg(long, value_name = "STRATEGY")]
    pub error_strategy: Option<ErrorStrategy>,

    /// Override `[config].execution_timeout`, e.g. `30s`.
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,

    /// Extra initial state as `key=value`; the value is parsed as JSON when
    /// possible and kept as a string otherwise. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub set: Vec<(String, serde_json::Value)>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_key_value(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
