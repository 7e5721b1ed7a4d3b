//! Failure handling integration tests.
//!
//! Tests that verify invalid graphs never run and that failed runs stop
//! early while keeping the results computed so far.

use crate::common::describe;
use dagex::testing::{ConstTask, ExecutionLog, FailingTask, RecordingTask};
use dagex::{
    AbortPolicy, Dag, DagBuilder, DagError, DagExecutor, ExecutionError, ExecutorConfig, Task,
    TaskError, TaskId, TaskInputs, blocking_fn, task_fn,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn recorded(name: &'static str, millis: u64, log: &ExecutionLog) -> Arc<dyn Task<String>> {
    RecordingTask::new(name, describe(name, Duration::from_millis(millis)), log).shared()
}

fn broken(name: &'static str, millis: u64, log: &ExecutionLog) -> Arc<dyn Task<String>> {
    let inner = FailingTask::always(format!("{} is broken", name))
        .with_delay(Duration::from_millis(millis));
    RecordingTask::new(name, Arc::new(inner), log).shared()
}

/// Test: a two-task cycle is rejected and nothing runs.
#[test]
fn test_cycle_fails_construction() {
    let log = ExecutionLog::new();
    let tasks = vec![("A", recorded("A", 0, &log)), ("B", recorded("B", 0, &log))];
    let dependencies = vec![("A", vec!["B"]), ("B", vec!["A"])];

    let err = Dag::from_parts(tasks, dependencies).unwrap_err();

    match err {
        DagError::CycleDetected(cycle) => {
            assert_eq!(cycle.len(), 2);
            assert!(cycle.contains(&TaskId::new("A")));
            assert!(cycle.contains(&TaskId::new("B")));
        }
        other => panic!("expected CycleDetected, got {other:?}"),
    }
    assert!(log.is_empty());
}

/// Test: a longer cycle behind a valid prefix is still found.
#[test]
fn test_cycle_message_names_the_loop() {
    let err = DagBuilder::<u8>::new()
        .add_task("root", ConstTask::new(0).shared())
        .add_task_with_deps("x", ConstTask::new(0).shared(), &["root", "z"])
        .add_task_with_deps("y", ConstTask::new(0).shared(), &["x"])
        .add_task_with_deps("z", ConstTask::new(0).shared(), &["y"])
        .build()
        .unwrap_err();

    assert!(matches!(err, DagError::CycleDetected(_)));
    let message = err.to_string();
    assert!(message.starts_with("cycle detected: "));
    for name in ["x", "y", "z"] {
        assert!(message.contains(name), "{} missing from {}", name, message);
    }
    assert!(!message.contains("root"));
}

/// Test: a dependency on an undefined task is rejected.
#[test]
fn test_unknown_dependency_fails_construction() {
    let tasks: Vec<(&str, Arc<dyn Task<String>>)> = vec![("A", describe("A", Duration::ZERO))];
    let dependencies = vec![("A", vec!["Z"])];

    let err = Dag::from_parts(tasks, dependencies).unwrap_err();

    assert_eq!(
        err,
        DagError::UnknownDependency {
            from: TaskId::new("A"),
            to: TaskId::new("Z"),
        }
    );
}

/// Test: dependency sets and computations must describe the same tasks.
#[test]
fn test_mismatched_maps_fail_construction() {
    let tasks: Vec<(&str, Arc<dyn Task<String>>)> = vec![("A", describe("A", Duration::ZERO))];

    let dependencies = vec![("A", Vec::<&str>::new()), ("B", Vec::new())];
    let err = Dag::from_parts(tasks.clone(), dependencies).unwrap_err();
    assert_eq!(err, DagError::MissingTask(TaskId::new("B")));

    let err = Dag::from_parts(tasks, Vec::<(&str, Vec<&str>)>::new()).unwrap_err();
    assert_eq!(err, DagError::MissingDependencies(TaskId::new("A")));
}

/// Test: a failing independent task aborts the run; tasks already running finish.
#[tokio::test]
async fn test_independent_failure_keeps_running_results() {
    let log = ExecutionLog::new();
    let dag = DagBuilder::new()
        .add_task("A", recorded("A", 60, &log))
        .add_task_with_deps("B", recorded("B", 0, &log), &["A"])
        .add_task("C", broken("C", 10, &log))
        .add_task_with_deps("D", recorded("D", 0, &log), &["B", "C"])
        .build()
        .unwrap();
    let executor = DagExecutor::new(dag).with_config(ExecutorConfig::new().with_max_concurrency(4));

    let err = executor.execute().await.unwrap_err();

    assert_eq!(err.failed_task().map(TaskId::as_str), Some("C"));
    assert!(err.to_string().contains("C is broken"));
    let partial = err.into_partial().unwrap();
    assert_eq!(partial.get("A").unwrap(), "Result from A");
    assert!(!partial.contains("B"));
    assert!(!partial.contains("D"));
    assert_eq!(log.call_count("B"), 0);
    assert_eq!(log.call_count("D"), 0);
}

/// Test: tasks downstream of a failure never run.
#[tokio::test]
async fn test_downstream_of_failure_never_runs() {
    let log = ExecutionLog::new();
    let dag = DagBuilder::new()
        .add_task("extract", recorded("extract", 0, &log))
        .add_task_with_deps("transform", broken("transform", 0, &log), &["extract"])
        .add_task_with_deps("load", recorded("load", 0, &log), &["transform"])
        .build()
        .unwrap();

    let err = DagExecutor::new(dag).execute().await.unwrap_err();

    match err {
        ExecutionError::TaskFailed {
            task_id,
            source,
            partial,
            also_failed,
        } => {
            assert_eq!(task_id.as_str(), "transform");
            assert!(matches!(source, TaskError::ExecutionFailed(_)));
            assert_eq!(partial.len(), 1);
            assert!(partial.contains("extract"));
            assert!(also_failed.is_empty());
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
    assert_eq!(log.call_count("load"), 0);
}

/// Test: a panic is reported as a task failure and the process carries on.
#[tokio::test]
async fn test_panic_is_reported_as_failure() {
    let dag = DagBuilder::new()
        .add_task("fine", ConstTask::new(1).shared())
        .add_task_with_deps(
            "explode",
            blocking_fn(|inputs: TaskInputs<i32>| {
                if inputs.require(0).is_ok() {
                    panic!("division by zero");
                }
                Ok(0)
            }),
            &["fine"],
        )
        .build()
        .unwrap();

    let err = DagExecutor::new(dag).execute().await.unwrap_err();

    match err {
        ExecutionError::TaskFailed {
            task_id, source, ..
        } => {
            assert_eq!(task_id.as_str(), "explode");
            assert!(matches!(source, TaskError::Panicked(ref m) if m == "division by zero"));
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }

    // The runtime is still usable afterwards.
    let dag = DagBuilder::new()
        .add_task("again", ConstTask::new(2).shared())
        .build()
        .unwrap();
    let results = DagExecutor::new(dag).execute().await.unwrap();
    assert_eq!(results.get("again"), Ok(&2));
}

/// Test: an error raised by a task's own input handling aborts the run.
#[tokio::test]
async fn test_invalid_input_error() {
    let dag = DagBuilder::new()
        .add_task("a", ConstTask::new(1).shared())
        .add_task_with_deps(
            "needs_two",
            task_fn(|inputs: TaskInputs<i32>| async move {
                inputs.expect_len(2)?;
                Ok::<_, TaskError>(0)
            }),
            &["a"],
        )
        .build()
        .unwrap();

    let err = DagExecutor::new(dag).execute().await.unwrap_err();

    match err {
        ExecutionError::TaskFailed { source, .. } => {
            assert!(matches!(source, TaskError::InvalidInput(_)));
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
}

/// Test: with the default policy, failures of tasks still running are collected.
#[tokio::test]
async fn test_running_failures_are_collected() {
    let log = ExecutionLog::new();
    let dag = DagBuilder::new()
        .add_task("early", broken("early", 5, &log))
        .add_task("late", broken("late", 50, &log))
        .add_task("ok", recorded("ok", 30, &log))
        .build()
        .unwrap();
    let executor = DagExecutor::new(dag).with_config(ExecutorConfig::new().with_max_concurrency(3));

    let err = executor.execute().await.unwrap_err();

    match err {
        ExecutionError::TaskFailed {
            task_id,
            partial,
            also_failed,
            ..
        } => {
            assert_eq!(task_id.as_str(), "early");
            assert!(partial.contains("ok"));
            let names: Vec<&str> = also_failed.iter().map(|(id, _)| id.as_str()).collect();
            assert_eq!(names, vec!["late"]);
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
}

/// Test: the cancel policy returns without waiting for running tasks.
#[tokio::test]
async fn test_cancel_policy_returns_promptly() {
    let log = ExecutionLog::new();
    let dag = DagBuilder::new()
        .add_task("slow", recorded("slow", 5_000, &log))
        .add_task("bad", broken("bad", 10, &log))
        .build()
        .unwrap();
    let config = ExecutorConfig::new()
        .with_max_concurrency(2)
        .with_abort_policy(AbortPolicy::Cancel);

    let start = Instant::now();
    let err = DagExecutor::new(dag)
        .with_config(config)
        .execute()
        .await
        .unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(err.failed_task().map(TaskId::as_str), Some("bad"));
    assert!(!err.partial().unwrap().contains("slow"));
    assert_eq!(log.call_count("slow"), 0);
}

/// Test: a run exceeding its timeout stops with the results it has.
#[tokio::test]
async fn test_run_timeout() {
    let log = ExecutionLog::new();
    let dag = DagBuilder::new()
        .add_task("fast", recorded("fast", 0, &log))
        .add_task_with_deps("stuck", recorded("stuck", 5_000, &log), &["fast"])
        .build()
        .unwrap();
    let config = ExecutorConfig::new().with_run_timeout(Duration::from_millis(100));

    let start = Instant::now();
    let err = DagExecutor::new(dag)
        .with_config(config)
        .execute()
        .await
        .unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(2));
    match err {
        ExecutionError::Timeout { after, partial } => {
            assert_eq!(after, Duration::from_millis(100));
            assert_eq!(partial.get("fast").unwrap(), "Result from fast");
            assert!(!partial.contains("stuck"));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}

/// Test: a timeout too large for the clock is accepted and never fires.
#[tokio::test]
async fn test_huge_timeout_from_yaml() {
    let config = ExecutorConfig::from_yaml_str("run_timeout_secs: 1.0e19").unwrap();
    let log = ExecutionLog::new();
    let dag = DagBuilder::new()
        .add_task("fast", recorded("fast", 0, &log))
        .build()
        .unwrap();

    let results = DagExecutor::new(dag)
        .with_config(config)
        .execute()
        .await
        .unwrap();

    assert_eq!(results.get("fast").unwrap(), "Result from fast");
}

/// Test: after a failure, waiting for running tasks stops at the run timeout.
#[tokio::test]
async fn test_run_timeout_bounds_wind_down() {
    let log = ExecutionLog::new();
    let dag = DagBuilder::new()
        .add_task("bad", broken("bad", 5, &log))
        .add_task("slow", recorded("slow", 3_000, &log))
        .build()
        .unwrap();
    let config = ExecutorConfig::new()
        .with_max_concurrency(2)
        .with_run_timeout(Duration::from_millis(200));

    let start = Instant::now();
    let err = DagExecutor::new(dag)
        .with_config(config)
        .execute()
        .await
        .unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(err.failed_task().map(TaskId::as_str), Some("bad"));
    assert!(!err.partial().unwrap().contains("slow"));
}

/// Test: a flaky task fails the first run and succeeds on the next.
#[tokio::test]
async fn test_rerun_after_failure() {
    let flaky = Arc::new(FailingTask::flaky(1, 5));
    let dag = DagBuilder::new()
        .add_task("flaky", flaky.clone())
        .add_task_with_deps(
            "double",
            task_fn(|inputs: TaskInputs<i32>| async move {
                Ok::<_, TaskError>(inputs.require(0)? * 2)
            }),
            &["flaky"],
        )
        .build()
        .unwrap();
    let executor = DagExecutor::new(dag);

    assert!(executor.execute().await.is_err());
    let results = executor.execute().await.unwrap();

    assert_eq!(results.get("double"), Ok(&10));
    assert_eq!(flaky.call_count().await, 2);
}
