//! Concurrent executor for directed acyclic graphs of dependent tasks.
//!
//! Build a [`Dag`] of named tasks, hand it to a [`DagExecutor`], and get
//! back a [`ResultStore`] with one result per task. Each task receives the
//! results of its dependencies in ascending name order.
//!
//! ```
//! use dagex::{DagBuilder, DagExecutor, TaskError, TaskInputs, task_fn};
//!
//! let dag = DagBuilder::new()
//!     .add_task("a", task_fn(|_: TaskInputs<i32>| async { Ok::<_, TaskError>(1) }))
//!     .add_task_with_deps(
//!         "b",
//!         task_fn(|inputs: TaskInputs<i32>| async move { Ok::<_, TaskError>(inputs.require(0)? + 1) }),
//!         &["a"],
//!     )
//!     .build()
//!     .unwrap();
//!
//! let results = DagExecutor::new(dag).execute_blocking().unwrap();
//! assert_eq!(results.get("b"), Ok(&2));
//! ```

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod testing;

pub use config::{AbortPolicy, Concurrency, ConfigError, ExecutorConfig};
pub use core::dag::{Dag, DagBuilder, DagError, TaskNode};
pub use core::task::{BlockingFnTask, FnTask, Task, TaskError, TaskInputs, blocking_fn, task_fn};
pub use core::types::{RunId, TaskId};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    DagExecutor, ExecutionError, InternalError, ReadinessTracker, ResultStore, RunState,
    StoreError, TaskState, TrackerError,
};
