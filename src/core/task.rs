//! Task trait, task inputs, and error types.
//!
//! A task is a computation that receives the results of its dependencies
//! and produces one result of the graph's result type `T`, or fails.
//! Implement [`Task`] directly, or wrap a closure with [`FnTask`] (async)
//! or [`BlockingFnTask`] (CPU-bound or blocking work).

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use super::types::TaskId;

/// Errors that can occur during task execution.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The task received inputs it cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The computation panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was cancelled before it produced a result.
    #[error("task cancelled before completion")]
    Cancelled,

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    /// Wrap any error type as [`TaskError::Other`].
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        TaskError::Other(err.into())
    }

    /// Check if this error represents a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    /// Build a `Panicked` error from a panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        TaskError::Panicked(message)
    }
}

/// Results of a task's dependencies, in ascending order of dependency name.
///
/// A task with dependencies `{"b", "a"}` always sees `a`'s result at index 0
/// and `b`'s at index 1. Values are shared with the result store, so reading
/// them never clones `T`.
pub struct TaskInputs<T> {
    entries: Vec<(TaskId, Arc<T>)>,
}

impl<T> TaskInputs<T> {
    /// Build inputs from `(dependency, result)` pairs. Entries are sorted by name.
    pub fn new(mut entries: Vec<(TaskId, Arc<T>)>) -> Self {
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        Self { entries }
    }

    /// Inputs for a task without dependencies.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Number of inputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True for a task without dependencies.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the input at a position.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index).map(|(_, value)| value.as_ref())
    }

    /// Get the input at a position, failing with [`TaskError::InvalidInput`].
    pub fn require(&self, index: usize) -> Result<&T, TaskError> {
        self.get(index).ok_or_else(|| {
            TaskError::InvalidInput(format!(
                "expected an input at position {}, got {} input(s)",
                index,
                self.len()
            ))
        })
    }

    /// Get the result of a named dependency.
    pub fn by_name(&self, name: &str) -> Option<&T> {
        self.entries
            .binary_search_by(|(id, _)| id.as_str().cmp(name))
            .ok()
            .map(|i| self.entries[i].1.as_ref())
    }

    /// Fail unless exactly `expected` inputs were supplied.
    pub fn expect_len(&self, expected: usize) -> Result<(), TaskError> {
        if self.len() == expected {
            Ok(())
        } else {
            Err(TaskError::InvalidInput(format!(
                "expected {} input(s), got {}",
                expected,
                self.len()
            )))
        }
    }

    /// Dependency names, in input order.
    pub fn names(&self) -> impl Iterator<Item = &TaskId> {
        self.entries.iter().map(|(id, _)| id)
    }

    /// Input values, in input order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, value)| value.as_ref())
    }

    /// `(dependency, value)` pairs, in input order.
    pub fn iter(&self) -> impl Iterator<Item = (&TaskId, &T)> {
        self.entries.iter().map(|(id, value)| (id, value.as_ref()))
    }

    /// Take the shared values, in input order.
    pub fn into_values(self) -> Vec<Arc<T>> {
        self.entries.into_iter().map(|(_, value)| value).collect()
    }
}

impl<T> Clone for TaskInputs<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for TaskInputs<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(id, value)| (id.as_str(), value)))
            .finish()
    }
}

/// The core trait for defining executable tasks.
///
/// # Example
///
/// ```ignore
/// use dagex::{Task, TaskError, TaskInputs};
/// use async_trait::async_trait;
///
/// struct Sum;
///
/// #[async_trait]
/// impl Task<i64> for Sum {
///     async fn execute(&self, inputs: TaskInputs<i64>) -> Result<i64, TaskError> {
///         Ok(inputs.values().sum())
///     }
/// }
/// ```
#[async_trait]
pub trait Task<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Execute the task with the results of its dependencies.
    ///
    /// # Returns
    /// * `Ok(T)` - Task completed; the value is stored and fed to dependents
    /// * `Err(TaskError)` - Task failed; the run is aborted
    async fn execute(&self, inputs: TaskInputs<T>) -> Result<T, TaskError>;

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<&str> {
        None
    }
}

/// A task backed by an async closure.
pub struct FnTask<F> {
    f: F,
    description: Option<String>,
}

impl<F> FnTask<F> {
    /// Wrap an async closure.
    pub fn new(f: F) -> Self {
        Self {
            f,
            description: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[async_trait]
impl<T, F, Fut> Task<T> for FnTask<F>
where
    T: Send + Sync + 'static,
    F: Fn(TaskInputs<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, TaskError>> + Send,
{
    async fn execute(&self, inputs: TaskInputs<T>) -> Result<T, TaskError> {
        (self.f)(inputs).await
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// A task backed by a synchronous closure, run on tokio's blocking pool.
///
/// Use this for CPU-bound work or code that blocks the current thread.
/// Once started, a blocking task cannot be interrupted.
pub struct BlockingFnTask<F> {
    f: Arc<F>,
    description: Option<String>,
}

impl<F> BlockingFnTask<F> {
    /// Wrap a blocking closure.
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            description: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[async_trait]
impl<T, F> Task<T> for BlockingFnTask<F>
where
    T: Send + Sync + 'static,
    F: Fn(TaskInputs<T>) -> Result<T, TaskError> + Send + Sync + 'static,
{
    async fn execute(&self, inputs: TaskInputs<T>) -> Result<T, TaskError> {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f(inputs)).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(TaskError::from_panic(err.into_panic())),
            Err(_) => Err(TaskError::Cancelled),
        }
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Wrap an async closure as a shareable task.
pub fn task_fn<T, F, Fut>(f: F) -> Arc<dyn Task<T>>
where
    T: Send + Sync + 'static,
    F: Fn(TaskInputs<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
{
    Arc::new(FnTask::new(f))
}

/// Wrap a blocking closure as a shareable task.
pub fn blocking_fn<T, F>(f: F) -> Arc<dyn Task<T>>
where
    T: Send + Sync + 'static,
    F: Fn(TaskInputs<T>) -> Result<T, TaskError> + Send + Sync + 'static,
{
    Arc::new(BlockingFnTask::new(f))
}
