#![cfg(unix)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use levelflow::cli::CliArgs;
use levelflow::config::{build_graph, initial_state, run_config};
use levelflow::errors::LevelflowError;
use levelflow::types::ErrorStrategy;
use levelflow_test_utils::builders::{ConfigFileBuilder, NodeConfigBuilder};
use levelflow_test_utils::{init_tracing, with_timeout};

#[tokio::test]
async fn upstream_output_is_passed_through_the_environment() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_node("a", NodeConfigBuilder::new("echo hello").build())
        .with_node(
            "b",
            NodeConfigBuilder::new(r#"printf '%s-world' "$LEVELFLOW_DEP_A""#)
                .after("a")
                .build(),
        )
        .build();

    let graph = build_graph(&cfg, run_config(&cfg).unwrap()).unwrap();
    let out = with_timeout(graph.execute(initial_state(&cfg))).await.unwrap();

    assert_eq!(out.output, serde_json::json!("hello-world"));
}

#[tokio::test]
async fn json_output_params_and_state_reach_the_command() {
    let cfg = ConfigFileBuilder::new()
        .with_state("topic", serde_json::json!("rust"))
        .with_node(
            "params",
            NodeConfigBuilder::new(r#"printf '%s' "$LEVELFLOW_PARAMS""#)
                .params(serde_json::json!({"x": 1}))
                .json_output()
                .build(),
        )
        .with_node(
            "state",
            NodeConfigBuilder::new(r#"printf '%s' "$LEVELFLOW_STATE""#)
                .after("params")
                .json_output()
                .build(),
        )
        .build();

    let graph = build_graph(&cfg, run_config(&cfg).unwrap()).unwrap();
    let out = with_timeout(graph.execute(initial_state(&cfg))).await.unwrap();

    assert_eq!(out.output, serde_json::json!({"topic": "rust"}));
}

#[tokio::test]
async fn conditional_edge_on_command_output() {
    let cfg = ConfigFileBuilder::new()
        .with_node("check", NodeConfigBuilder::new("echo status=red").build())
        .with_node("deploy", NodeConfigBuilder::new("echo deployed").build())
        .with_node("report", NodeConfigBuilder::new("echo reported").after("check").build())
        .with_edge("check", "deploy", Some(r#"output contains "green""#))
        .output("report")
        .build();

    let graph = build_graph(&cfg, run_config(&cfg).unwrap()).unwrap();
    let out = with_timeout(graph.execute(HashMap::new())).await.unwrap();

    assert_eq!(out.output, serde_json::json!("reported"));
    assert_eq!(out.metadata.statuses.skipped, 1);
}

#[tokio::test]
async fn non_zero_exit_fails_the_node() {
    let cfg = ConfigFileBuilder::new()
        .with_node("bad", NodeConfigBuilder::new("exit 3").build())
        .with_node("after", NodeConfigBuilder::new("echo never").after("bad").build())
        .build();

    let graph = build_graph(&cfg, run_config(&cfg).unwrap()).unwrap();
    let err = with_timeout(graph.execute(HashMap::new())).await.unwrap_err();

    match err {
        LevelflowError::NodeFailed { node, source, .. } => {
            assert_eq!(node, "bad");
            assert!(source.to_string().contains("status 3"));
        }
        other => panic!("expected NodeFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn node_timeout_kills_the_process() {
    let cfg = ConfigFileBuilder::new()
        .with_node("slow", NodeConfigBuilder::new("sleep 5").timeout("100ms").build())
        .with_node("fast", NodeConfigBuilder::new("echo ok").build())
        .output("fast")
        .error_strategy(ErrorStrategy::ContinueOnError)
        .build();

    let graph = build_graph(&cfg, run_config(&cfg).unwrap()).unwrap();
    let started = Instant::now();
    let out = with_timeout(graph.execute(HashMap::new())).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(out.output, serde_json::json!("ok"));
    assert_eq!(out.metadata.statuses.failed, 1);
}

#[tokio::test]
async fn cli_dry_run_executes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let path = dir.path().join("Levelflow.toml");
    std::fs::write(
        &path,
        format!("[node.a]\ncmd = \"touch {}\"\n", marker.display()),
    )
    .unwrap();

    let args = CliArgs {
        config: path.display().to_string(),
        log_level: None,
        dry_run: true,
        max_concurrency: None,
        error_strategy: None,
        timeout: None,
        set: Vec::new(),
    };
    levelflow::run(args).await.unwrap();

    assert!(!marker.exists());
}

#[tokio::test]
async fn cli_run_applies_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Levelflow.toml");
    std::fs::write(
        &path,
        "[node.a]\ncmd = \"printf '%s' \\\"$LEVELFLOW_STATE\\\"\"\noutput_format = \"json\"\n",
    )
    .unwrap();

    let args = CliArgs {
        config: path.display().to_string(),
        log_level: None,
        dry_run: false,
        max_concurrency: Some(1),
        error_strategy: Some(ErrorStrategy::ContinueOnError),
        timeout: Some("5s".to_string()),
        set: vec![("who".to_string(), serde_json::json!("cli"))],
    };
    levelflow::run(args).await.unwrap();

    let bad = CliArgs {
        config: path.display().to_string(),
        log_level: None,
        dry_run: true,
        max_concurrency: None,
        error_strategy: None,
        timeout: Some("later".to_string()),
        set: Vec::new(),
    };
    assert!(levelflow::run(bad).await.is_err());
}
