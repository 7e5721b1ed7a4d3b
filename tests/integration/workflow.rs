//! Complete workflow integration tests.
//!
//! Tests that verify full runs from graph construction to the result store.

use crate::common::{assert_dependencies_finished_first, describe, diamond};
use dagex::testing::{ConstTask, ExecutionLog, RecordingTask};
use dagex::{
    Dag, DagBuilder, DagExecutor, ExecutorConfig, Task, TaskError, TaskId, TaskInputs,
    blocking_fn, task_fn,
};
use std::sync::Arc;
use std::time::Duration;

/// Test: the diamond graph produces one result per task, built from the right inputs.
#[tokio::test]
async fn test_diamond_produces_expected_results() {
    let log = ExecutionLog::new();
    let executor = DagExecutor::new(diamond(&log, [10, 10, 10, 10]));

    let results = executor.execute().await.unwrap();

    assert_eq!(results.len(), 4);
    assert_eq!(results.get("A").unwrap(), "Result from A");
    assert_eq!(results.get("B").unwrap(), "Result from B, based on Result from A");
    assert_eq!(results.get("C").unwrap(), "Result from C");
    assert_eq!(
        results.get("D").unwrap(),
        "Result from D, based on Result from B, based on Result from A and Result from C"
    );

    let names: Vec<&str> = results.task_ids().map(TaskId::as_str).collect();
    assert_eq!(names, vec!["A", "B", "C", "D"]);
}

/// Test: input order does not depend on which root finishes first.
#[tokio::test]
async fn test_input_order_is_independent_of_timing() {
    let slow_a = ExecutionLog::new();
    let slow_c = ExecutionLog::new();

    let first = DagExecutor::new(diamond(&slow_a, [60, 0, 0, 0]))
        .execute()
        .await
        .unwrap();
    let second = DagExecutor::new(diamond(&slow_c, [0, 0, 60, 0]))
        .execute()
        .await
        .unwrap();

    assert_eq!(first.get("D"), second.get("D"));
    assert_eq!(
        slow_a.get("D").unwrap().inputs,
        vec![TaskId::new("B"), TaskId::new("C")]
    );
    assert_eq!(
        slow_c.get("D").unwrap().inputs,
        vec![TaskId::new("B"), TaskId::new("C")]
    );
}

/// Test: every task runs exactly once and only after its dependencies.
#[tokio::test]
async fn test_each_task_runs_once_after_dependencies() {
    let log = ExecutionLog::new();
    let dag = diamond(&log, [15, 5, 25, 5]);
    let executor = DagExecutor::new(dag).with_config(ExecutorConfig::new().with_max_concurrency(4));

    executor.execute().await.unwrap();

    for name in ["A", "B", "C", "D"] {
        assert_eq!(log.call_count(name), 1, "{} should run once", name);
    }
    assert_dependencies_finished_first(executor.dag(), &log);
    assert_eq!(log.start_order().last().map(TaskId::as_str), Some("D"));
}

/// Test: a graph described as two maps, the way callers often hold it.
#[tokio::test]
async fn test_from_parts() {
    let tasks: Vec<(&str, Arc<dyn Task<String>>)> = vec![
        ("A", describe("A", Duration::ZERO)),
        ("B", describe("B", Duration::ZERO)),
        ("C", describe("C", Duration::ZERO)),
        ("D", describe("D", Duration::ZERO)),
    ];
    let dependencies = vec![
        ("A", vec![]),
        ("B", vec!["A"]),
        ("C", vec![]),
        ("D", vec!["C", "B"]),
    ];

    let dag = Dag::from_parts(tasks, dependencies).unwrap();
    let results = DagExecutor::new(dag).execute().await.unwrap();

    assert_eq!(
        results.get("D").unwrap(),
        "Result from D, based on Result from B, based on Result from A and Result from C"
    );
}

/// Test: a wide fan-in sees every upstream result in name order.
#[tokio::test]
async fn test_fan_in_receives_sorted_inputs() {
    let mut builder = DagBuilder::new();
    let mut names = Vec::new();
    // Insert in reverse so name order differs from insertion order.
    for i in (0..20u64).rev() {
        let name = format!("src_{:02}", i);
        builder = builder.add_task(name.clone(), ConstTask::new(i).shared());
        names.push(name);
    }
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let collect = task_fn(|inputs: TaskInputs<u64>| async move {
        let ordered: Vec<u64> = inputs.values().copied().collect();
        if ordered.windows(2).all(|pair| pair[0] < pair[1]) {
            Ok(ordered.len() as u64)
        } else {
            Err(TaskError::InvalidInput(format!("unsorted inputs: {:?}", ordered)))
        }
    });
    let dag = builder
        .add_task_with_deps("sink", collect, &refs)
        .build()
        .unwrap();

    let results = DagExecutor::new(dag).execute().await.unwrap();

    assert_eq!(results.get("sink"), Ok(&20));
}

/// Test: a layered graph where each task sums its inputs.
#[tokio::test]
async fn test_layered_sum() {
    let log = ExecutionLog::new();
    let sum = || {
        task_fn(|inputs: TaskInputs<u64>| async move {
            Ok::<_, TaskError>(inputs.values().sum::<u64>())
        })
    };

    let mut builder = DagBuilder::new();
    for i in 0..4 {
        let name = format!("l0_{}", i);
        builder = builder.add_task(
            name.clone(),
            RecordingTask::new(name, ConstTask::new(1u64).shared(), &log).shared(),
        );
    }
    for layer in 1..4 {
        let deps: Vec<String> = (0..4).map(|i| format!("l{}_{}", layer - 1, i)).collect();
        let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
        for i in 0..4 {
            let name = format!("l{}_{}", layer, i);
            builder = builder.add_task_with_deps(
                name.clone(),
                RecordingTask::new(name, sum(), &log).shared(),
                &deps,
            );
        }
    }
    let dag = builder.build().unwrap();
    let executor = DagExecutor::new(dag).with_config(ExecutorConfig::new().with_max_concurrency(3));

    let results = executor.execute().await.unwrap();

    // 1 -> 4 -> 16 -> 64
    assert_eq!(results.get("l3_0"), Ok(&64));
    assert_eq!(results.len(), 16);
    assert_eq!(log.len(), 16);
    assert_dependencies_finished_first(executor.dag(), &log);
}

/// Test: blocking computations take part in the same graph as async ones.
#[tokio::test]
async fn test_mixed_blocking_and_async_tasks() {
    let dag = DagBuilder::new()
        .add_task(
            "crunch",
            blocking_fn(|_inputs: TaskInputs<u64>| {
                std::thread::sleep(Duration::from_millis(10));
                Ok((1..=10).product())
            }),
        )
        .add_task("fetch", ConstTask::new(2).with_delay(Duration::from_millis(5)).shared())
        .add_task_with_deps(
            "combine",
            task_fn(|inputs: TaskInputs<u64>| async move {
                Ok::<_, TaskError>(inputs.require(0)? / inputs.require(1)?)
            }),
            &["crunch", "fetch"],
        )
        .build()
        .unwrap();

    let results = DagExecutor::new(dag).execute().await.unwrap();

    assert_eq!(results.get("combine"), Ok(&1_814_400));
}

/// Test: one executor can be run repeatedly and concurrently.
#[tokio::test]
async fn test_executor_runs_are_independent() {
    let log = ExecutionLog::new();
    let executor = DagExecutor::new(diamond(&log, [10, 0, 10, 0]));

    let (first, second) = tokio::join!(executor.execute(), executor.execute());
    let third = executor.execute().await;

    assert_eq!(first.unwrap().len(), 4);
    assert_eq!(second.unwrap().len(), 4);
    assert_eq!(third.unwrap().len(), 4);
    assert_eq!(log.call_count("D"), 3);
}

/// Test: configuration loaded from YAML drives the run.
#[tokio::test]
async fn test_yaml_configuration() {
    let config = ExecutorConfig::from_yaml_str("max_concurrency: 1\non_failure: cancel\n").unwrap();
    let log = ExecutionLog::new();
    let executor = DagExecutor::new(diamond(&log, [5, 5, 5, 5])).with_config(config);

    executor.execute().await.unwrap();

    assert!(!log.any_overlap());
}

/// Test: the blocking entry point works outside any runtime.
#[test]
fn test_execute_blocking_outside_runtime() {
    let log = ExecutionLog::new();
    let executor = DagExecutor::new(diamond(&log, [0, 0, 0, 0]));

    let results = executor.execute_blocking().unwrap();

    assert_eq!(results.get("C").unwrap(), "Result from C");
    let owned = results.into_owned();
    assert_eq!(owned.len(), 4);
}
