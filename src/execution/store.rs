//! Write-once store of task results.
//!
//! The store is owned by the orchestration loop of a single run. Workers
//! never touch it: they send their results back over the completion channel
//! and the loop performs every write, so insertions cannot race.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::core::task::TaskInputs;
use crate::core::types::TaskId;

/// Errors raised by the result store. Both indicate a scheduler bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A result was written twice for the same task.
    #[error("duplicate result for task: {0}")]
    DuplicateResult(TaskId),

    /// A result was read before the task completed.
    #[error("missing result for task: {0}")]
    MissingResult(TaskId),
}

/// Append-only mapping from task name to computed result.
pub struct ResultStore<T> {
    results: BTreeMap<TaskId, Arc<T>>,
}

impl<T> ResultStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            results: BTreeMap::new(),
        }
    }

    /// Record a task's result. Fails if the task already has one.
    pub fn set(&mut self, id: TaskId, value: T) -> Result<(), StoreError> {
        if self.results.contains_key(&id) {
            return Err(StoreError::DuplicateResult(id));
        }
        self.results.insert(id, Arc::new(value));
        Ok(())
    }

    /// Get a task's result.
    pub fn get(&self, id: &str) -> Result<&T, StoreError> {
        self.results
            .get(id)
            .map(|value| value.as_ref())
            .ok_or_else(|| StoreError::MissingResult(TaskId::new(id)))
    }

    /// Get a shared handle to a task's result.
    pub fn get_shared(&self, id: &str) -> Result<Arc<T>, StoreError> {
        self.results
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::MissingResult(TaskId::new(id)))
    }

    /// Collect the inputs for a task from its dependency set.
    ///
    /// Inputs come out in name order, the iteration order of the set.
    pub fn gather(&self, dependencies: &BTreeSet<TaskId>) -> Result<TaskInputs<T>, StoreError> {
        let entries = dependencies
            .iter()
            .map(|dep| Ok((dep.clone(), self.get_shared(dep.as_str())?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(TaskInputs::new(entries))
    }

    /// Check whether a task has a result.
    pub fn contains(&self, id: &str) -> bool {
        self.results.contains_key(id)
    }

    /// Number of stored results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True when no result has been stored.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Names of tasks with a result, in name order.
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.results.keys()
    }

    /// `(task, result)` pairs, in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&TaskId, &T)> {
        self.results.iter().map(|(id, value)| (id, value.as_ref()))
    }

    /// Consume the store, keeping results shared.
    pub fn into_map(self) -> BTreeMap<TaskId, Arc<T>> {
        self.results
    }
}

impl<T: Clone> ResultStore<T> {
    /// Consume the store into owned results.
    ///
    /// Results still referenced elsewhere are cloned.
    pub fn into_owned(self) -> BTreeMap<TaskId, T> {
        self.results
            .into_iter()
            .map(|(id, value)| (id, Arc::unwrap_or_clone(value)))
            .collect()
    }
}

impl<T> Default for ResultStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ResultStore<T> {
    fn clone(&self) -> Self {
        Self {
            results: self.results.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ResultStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.results.iter().map(|(id, value)| (id.as_str(), value)))
            .finish()
    }
}
