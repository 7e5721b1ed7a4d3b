//! Readiness tracking for a single DAG run.
//!
//! The tracker keeps, per task, the number of dependencies that have not yet
//! completed. A task whose count drops to zero becomes ready and is handed out
//! by [`ReadinessTracker::ready`] exactly once.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use thiserror::Error;

use crate::core::dag::Dag;
use crate::core::types::TaskId;

/// Lifecycle state of a task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Task is waiting for dependencies.
    Pending,
    /// All dependencies completed; not yet handed to the dispatcher.
    Ready,
    /// Handed to the dispatcher (queued for a worker or executing).
    Running,
    /// Task completed successfully and its result is stored.
    Completed,
    /// Task failed, panicked, or was cancelled.
    Failed,
}

impl TaskState {
    /// Completed and Failed are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Errors raised when the executor reports an impossible transition.
///
/// These indicate a scheduler bug, not a task failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// The task is not part of the graph.
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    /// The task finished without having been handed out by `ready()`.
    #[error("task '{task}' finished while {state:?}, before it was dispatched")]
    NotDispatched { task: TaskId, state: TaskState },

    /// The task was reported finished twice.
    #[error("task '{task}' already finished as {state:?}")]
    AlreadyFinished { task: TaskId, state: TaskState },
}

/// Number of tasks in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Incremental readiness tracker over a validated DAG.
#[derive(Debug, Clone)]
pub struct ReadinessTracker {
    /// Remaining uncompleted dependencies per task.
    remaining: HashMap<TaskId, usize>,
    /// Reverse edges: task -> tasks that depend on it.
    dependents: HashMap<TaskId, Vec<TaskId>>,
    /// Current state of every task.
    states: BTreeMap<TaskId, TaskState>,
    /// Ready tasks not yet returned by `ready()`.
    ready: BTreeSet<TaskId>,
    /// Tasks not yet Completed or Failed.
    active: usize,
}

impl ReadinessTracker {
    /// Build a tracker for a DAG. Tasks without dependencies start Ready.
    pub fn new<T>(dag: &Dag<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        let mut remaining = HashMap::with_capacity(dag.len());
        let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut states = BTreeMap::new();
        let mut ready = BTreeSet::new();

        for (id, deps) in dag.edges() {
            remaining.insert(id.clone(), deps.len());
            for dep in deps {
                dependents.entry(dep.clone()).or_default().push(id.clone());
            }
            if deps.is_empty() {
                states.insert(id.clone(), TaskState::Ready);
                ready.insert(id.clone());
            } else {
                states.insert(id.clone(), TaskState::Pending);
            }
        }

        Self {
            remaining,
            dependents,
            active: states.len(),
            states,
            ready,
        }
    }

    /// Take every ready task not yet handed out, in name order.
    ///
    /// Returned tasks move to Running; a later call never returns them again.
    pub fn ready(&mut self) -> Vec<TaskId> {
        let ready = std::mem::take(&mut self.ready);
        for id in &ready {
            self.states.insert(id.clone(), TaskState::Running);
        }
        ready.into_iter().collect()
    }

    /// Record a successful completion.
    ///
    /// Decrements the remaining count of every dependent and returns the
    /// tasks that became ready as a result.
    pub fn mark_completed(&mut self, id: &TaskId) -> Result<Vec<TaskId>, TrackerError> {
        self.finish(id, TaskState::Completed)?;

        let mut unblocked = Vec::new();
        for dependent in self.dependents.get(id).into_iter().flatten() {
            if let Some(count) = self.remaining.get_mut(dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.states.insert(dependent.clone(), TaskState::Ready);
                    self.ready.insert(dependent.clone());
                    unblocked.push(dependent.clone());
                }
            }
        }
        Ok(unblocked)
    }

    /// Record a failure. Dependents stay Pending.
    pub fn mark_failed(&mut self, id: &TaskId) -> Result<(), TrackerError> {
        self.finish(id, TaskState::Failed)
    }

    fn finish(&mut self, id: &TaskId, outcome: TaskState) -> Result<(), TrackerError> {
        let state = self
            .states
            .get_mut(id)
            .ok_or_else(|| TrackerError::UnknownTask(id.clone()))?;

        match *state {
            TaskState::Running => {
                *state = outcome;
                self.active -= 1;
                Ok(())
            }
            TaskState::Pending | TaskState::Ready => Err(TrackerError::NotDispatched {
                task: id.clone(),
                state: *state,
            }),
            TaskState::Completed | TaskState::Failed => Err(TrackerError::AlreadyFinished {
                task: id.clone(),
                state: *state,
            }),
        }
    }

    /// True while any task is neither Completed nor Failed.
    pub fn is_active(&self) -> bool {
        self.active > 0
    }

    /// Current state of a task.
    pub fn state(&self, id: &TaskId) -> Option<TaskState> {
        self.states.get(id).copied()
    }

    /// Snapshot of all task states, in name order.
    pub fn states(&self) -> &BTreeMap<TaskId, TaskState> {
        &self.states
    }

    /// Tasks currently in the given state, in name order.
    pub fn tasks_in(&self, state: TaskState) -> Vec<TaskId> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of tasks in each state.
    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for state in self.states.values() {
            match state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Ready => counts.ready += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
