// src/lib.rs

//! Level-parallel DAG execution engine.
//!
//! A [`Graph`] is split into levels; each level's ready nodes run
//! concurrently (optionally bounded), and the next level only starts once
//! the previous one fully settled. See [`engine`] for the moving parts.

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod state;
pub mod types;

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::CliArgs;
use crate::config::{
    ConfigFile, build_graph, initial_state, load_and_validate, parse_duration, run_config,
};
use crate::dag::RunConfig;

pub use crate::dag::{Edge, Graph, GraphBuilder, Node, NodeOutput, NodeResult, NodeStatus};
pub use crate::engine::{ExecutionHooks, ExecutionOutput, RunMetadata};
pub use crate::errors::LevelflowError;
pub use crate::exec::{CommandExecutor, FnExecutor};
pub use crate::state::{InMemoryState, StateProvider};
pub use crate::types::ErrorStrategy;

/// High-level entry point used by `main.rs`: load the config, apply CLI
/// overrides, run the graph and print the output as JSON on stdout.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let run = apply_overrides(run_config(&cfg)?, &args)?;
    let graph = build_graph(&cfg, run)?;

    if args.dry_run {
        print!("{}", dry_run_report(&cfg, &graph, &run)?);
        return Ok(());
    }

    let mut initial = initial_state(&cfg);
    initial.extend(args.set.iter().cloned());

    let result = graph.execute(initial).await?;
    let meta = &result.metadata;
    info!(
        elapsed_ms = meta.elapsed.as_millis() as u64,
        all_completed = meta.all_completed,
        completed = meta.statuses.completed,
        failed = meta.statuses.failed,
        skipped = meta.statuses.skipped,
        "summary"
    );

    println!("{}", serde_json::to_string_pretty(&result.output)?);
    Ok(())
}

fn apply_overrides(mut run: RunConfig, args: &CliArgs) -> Result<RunConfig> {
    if let Some(n) = args.max_concurrency {
        run.max_concurrency = n;
    }
    if let Some(strategy) = args.error_strategy {
        run.error_strategy = strategy;
    }
    if let Some(timeout) = &args.timeout {
        let timeout = parse_duration(timeout)
            .map_err(|e| anyhow::anyhow!("invalid --timeout: {e}"))?;
        run.execution_timeout = Some(timeout);
    }
    Ok(run)
}

/// Levels, nodes and commands of the graph, rendered without executing.
fn dry_run_report(
    cfg: &ConfigFile,
    graph: &Graph<serde_json::Value>,
    run: &RunConfig,
) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    writeln!(out, "levelflow dry-run")?;
    writeln!(out, "  output = {}", graph.output_node())?;
    writeln!(out, "  max_concurrency = {}", run.max_concurrency)?;
    writeln!(out, "  error_strategy = {}", run.error_strategy)?;
    if let Some(timeout) = run.execution_timeout {
        writeln!(out, "  execution_timeout = {timeout:?}")?;
    }
    writeln!(out)?;

    for (idx, level) in graph.levels().iter().enumerate() {
        writeln!(out, "level {idx}:")?;
        for id in level {
            writeln!(out, "  - {id}")?;
            if let Some(node) = cfg.node.get(id) {
                writeln!(out, "      cmd: {}", node.cmd)?;
                if let Some(timeout) = &node.timeout {
                    writeln!(out, "      timeout: {timeout}")?;
                }
            }
            let deps = graph.dependencies_of(id);
            if !deps.is_empty() {
                writeln!(out, "      after: {deps:?}")?;
            }
            for edge in graph.incoming_edges(id).filter(|e| e.condition.is_some()) {
                writeln!(out, "      conditional on: {}", edge.from)?;
            }
            let feeds = graph.dependents_of(id);
            if !feeds.is_empty() {
                writeln!(out, "      feeds: {feeds:?}")?;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfigFile;

    #[test]
    fn dry_run_lists_levels_dependencies_and_dependents() {
        let raw: RawConfigFile = toml::from_str(
            r#"
            [node.fetch]
            cmd = "echo fetch"

            [node.parse]
            cmd = "echo parse"
            after = ["fetch"]
            "#,
        )
        .unwrap();
        let cfg = ConfigFile::try_from(raw).unwrap();
        let run = run_config(&cfg).unwrap();
        let graph = build_graph(&cfg, run).unwrap();

        let report = dry_run_report(&cfg, &graph, &run).unwrap();

        assert!(report.contains("output = parse"));
        assert!(report.contains("level 0:\n  - fetch\n      cmd: echo fetch\n      feeds: [\"parse\"]"));
        assert!(report.contains("level 1:\n  - parse\n      cmd: echo parse\n      after: [\"fetch\"]"));
    }
}
