//! Common test utilities shared across integration tests.

use dagex::testing::{ExecutionLog, RecordingTask};
use dagex::{Dag, DagBuilder, Task, TaskError, TaskInputs, task_fn};
use std::sync::Arc;
use std::time::Duration;

/// Task that sleeps, then describes the results it was given.
///
/// Roots produce `"Result from X"`; other tasks produce
/// `"Result from X, based on <inputs joined by ' and '>"`.
pub fn describe(name: &'static str, delay: Duration) -> Arc<dyn Task<String>> {
    task_fn(move |inputs: TaskInputs<String>| async move {
        tokio::time::sleep(delay).await;
        if inputs.is_empty() {
            return Ok::<_, TaskError>(format!("Result from {}", name));
        }
        let upstream: Vec<&str> = inputs.values().map(String::as_str).collect();
        Ok(format!("Result from {}, based on {}", name, upstream.join(" and ")))
    })
}

/// The diamond graph A, B <- A, C, D <- {B, C}, with every call recorded.
///
/// `delays` are the simulated work of A, B, C and D in milliseconds.
pub fn diamond(log: &ExecutionLog, delays: [u64; 4]) -> Dag<String> {
    let task = |name: &'static str, millis: u64| {
        RecordingTask::new(name, describe(name, Duration::from_millis(millis)), log).shared()
    };

    DagBuilder::new()
        .add_task("A", task("A", delays[0]))
        .add_task_with_deps("B", task("B", delays[1]), &["A"])
        .add_task("C", task("C", delays[2]))
        .add_task_with_deps("D", task("D", delays[3]), &["B", "C"])
        .build()
        .unwrap()
}

/// Assert that every recorded call started after all of its dependencies returned.
pub fn assert_dependencies_finished_first<T>(dag: &Dag<T>, log: &ExecutionLog)
where
    T: Send + Sync + 'static,
{
    for invocation in log.invocations() {
        let deps = dag.get_dependencies(&invocation.task_id).unwrap();
        for dep in deps {
            let upstream = log
                .get(dep.as_str())
                .unwrap_or_else(|| panic!("{} ran before {}", invocation.task_id, dep));
            assert!(
                upstream.finished <= invocation.started,
                "{} started before {} finished",
                invocation.task_id,
                dep
            );
        }
    }
}
