//! Task execution engine.
//!
//! A run is driven by [`DagExecutor`] on top of three pieces of per-run
//! state: the [`ReadinessTracker`] that knows which tasks may start, the
//! [`Dispatcher`] that runs them on a bounded worker pool, and the
//! [`ResultStore`] that keeps what they produced.

mod dispatcher;
mod executor;
mod store;
mod tracker;

pub use dispatcher::{Completion, Dispatcher};
pub use executor::{DagExecutor, ExecutionError, InternalError, RunState};
pub use store::{ResultStore, StoreError};
pub use tracker::{ReadinessTracker, StateCounts, TaskState, TrackerError};
