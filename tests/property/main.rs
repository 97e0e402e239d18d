use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use proptest::prelude::*;

use levelflow::dag::{Graph, Node, NodeStatus};
use levelflow::state::{InMemoryState, StateProvider};
use levelflow::types::ErrorStrategy;
use levelflow_test_utils::{Event, ExecutionLog, RecordingExecutor};

#[derive(Debug, Clone)]
struct Case {
    /// deps[i] only references nodes < i, so the graph is acyclic.
    deps: Vec<BTreeSet<usize>>,
    failing: BTreeSet<usize>,
}

fn case_strategy(max_nodes: usize) -> impl Strategy<Value = Case> {
    (1..=max_nodes).prop_flat_map(|n| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), n),
            proptest::collection::btree_set(0..n, 0..=n / 2),
        )
            .prop_map(move |(raw, failing)| {
                let deps = raw
                    .into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        if i == 0 {
                            BTreeSet::new()
                        } else {
                            picks.into_iter().map(|p| p % i).collect()
                        }
                    })
                    .collect();
                Case { deps, failing }
            })
    })
}

fn name(i: usize) -> String {
    format!("n{i}")
}

fn run_case(case: &Case) -> (Arc<InMemoryState>, ExecutionLog) {
    let log = ExecutionLog::new();
    let last = case.deps.len() - 1;

    let mut builder = Graph::<serde_json::Value>::builder(name(last))
        .error_strategy(ErrorStrategy::ContinueOnError)
        .max_concurrency(2);
    for (i, deps) in case.deps.iter().enumerate() {
        let mut exec = RecordingExecutor::new(&log).json(serde_json::json!(i));
        if case.failing.contains(&i) {
            exec = exec.failing("injected");
        }
        let mut node = Node::new(name(i), exec);
        for d in deps {
            node = node.after(name(*d));
        }
        builder = builder.node(node);
    }
    let graph = builder.build().unwrap();

    let state = Arc::new(InMemoryState::new());
    let dynamic: Arc<dyn StateProvider> = state.clone();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    // The output node may legitimately fail or be skipped.
    let _ = rt.block_on(graph.execute_with_state(dynamic, HashMap::new()));

    (state, log)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn skips_propagate_and_failures_stay_local(case in case_strategy(10)) {
        let (state, log) = run_case(&case);
        let statuses = state.statuses();

        for (i, deps) in case.deps.iter().enumerate() {
            let own = statuses[&name(i)];
            let blocked = deps
                .iter()
                .any(|d| matches!(statuses[&name(*d)], NodeStatus::Failed | NodeStatus::Skipped));

            prop_assert!(own.is_terminal(), "{} ended {:?}", name(i), own);
            if blocked {
                prop_assert_eq!(own, NodeStatus::Skipped);
                prop_assert_eq!(log.calls(&name(i)), 0);
            } else if case.failing.contains(&i) {
                prop_assert_eq!(own, NodeStatus::Failed);
                prop_assert_eq!(log.calls(&name(i)), 1);
            } else {
                prop_assert_eq!(own, NodeStatus::Completed);
                prop_assert_eq!(log.calls(&name(i)), 1);
            }
        }
    }

    #[test]
    fn nodes_start_only_after_their_dependencies_finish(case in case_strategy(10)) {
        let (_state, log) = run_case(&case);

        for (i, deps) in case.deps.iter().enumerate() {
            let Some(start) = log.position(&Event::Started(name(i))) else {
                continue;
            };
            for d in deps {
                let finished = log.position(&Event::Finished(name(*d)));
                prop_assert!(
                    finished.is_some_and(|f| f < start),
                    "{} started before dependency {} finished",
                    name(i),
                    name(*d)
                );
            }
        }
    }
}
