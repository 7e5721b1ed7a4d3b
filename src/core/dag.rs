//! Directed Acyclic Graph (DAG) for task dependencies.
//!
//! A DAG pairs every task with the set of tasks whose results it consumes.
//! Tasks can only run after all their dependencies have completed. The graph
//! is validated once, when it is built, and is immutable afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::task::Task;
use super::types::TaskId;

/// Errors that can occur when building a DAG.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    /// A cycle was detected in the graph. Lists the tasks along the cycle.
    #[error("cycle detected: {}", format_cycle(.0))]
    CycleDetected(Vec<TaskId>),

    /// A dependency references a task that doesn't exist.
    #[error("unknown dependency: task '{from}' depends on non-existent task '{to}'")]
    UnknownDependency { from: TaskId, to: TaskId },

    /// Attempted to add a duplicate task.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),

    /// A dependency set was declared for a task with no computation.
    #[error("dependencies declared for undefined task: {0}")]
    MissingTask(TaskId),

    /// A computation was supplied without a dependency set.
    #[error("no dependency set declared for task: {0}")]
    MissingDependencies(TaskId),

    /// Task not found in the DAG.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
}

fn format_cycle(cycle: &[TaskId]) -> String {
    let mut names: Vec<&str> = cycle.iter().map(|id| id.as_str()).collect();
    if let Some(first) = names.first().copied() {
        names.push(first);
    }
    names.join(" -> ")
}

/// A node in the DAG representing a task.
pub struct TaskNode<T> {
    /// The task ID.
    pub id: TaskId,

    /// The task implementation.
    pub task: Arc<dyn Task<T>>,
}

impl<T> Clone for TaskNode<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            task: Arc::clone(&self.task),
        }
    }
}

impl<T> fmt::Debug for TaskNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode").field("id", &self.id).finish()
    }
}

/// A Directed Acyclic Graph of tasks producing results of type `T`.
pub struct Dag<T> {
    /// Task nodes indexed by ID.
    nodes: BTreeMap<TaskId, TaskNode<T>>,

    /// Edges: task_id -> set of tasks it depends on.
    dependencies: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

impl<T> Dag<T>
where
    T: Send + Sync + 'static,
{
    /// Create a new empty DAG.
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            dependencies: BTreeMap::new(),
        }
    }

    /// Build a validated DAG from a task map and a dependency map.
    ///
    /// Every task must have exactly one dependency entry (possibly empty)
    /// and every dependency entry must name a task. The result is checked for unknown
    /// dependencies and cycles before it is returned.
    pub fn from_parts<K, J, D, I>(
        tasks: impl IntoIterator<Item = (K, Arc<dyn Task<T>>)>,
        dependencies: impl IntoIterator<Item = (J, D)>,
    ) -> Result<Self, DagError>
    where
        K: Into<TaskId>,
        J: Into<TaskId>,
        D: IntoIterator<Item = I>,
        I: Into<TaskId>,
    {
        let mut dag = Self::new();
        for (id, task) in tasks {
            dag.add_task(id, task)?;
        }

        let mut declared: BTreeMap<TaskId, BTreeSet<TaskId>> = BTreeMap::new();
        for (id, deps) in dependencies {
            let id = id.into();
            if declared.contains_key(&id) {
                return Err(DagError::DuplicateTask(id));
            }
            let deps: BTreeSet<TaskId> = deps.into_iter().map(Into::into).collect();
            declared.insert(id, deps);
        }

        if let Some(id) = declared.keys().find(|id| !dag.nodes.contains_key(*id)) {
            return Err(DagError::MissingTask(id.clone()));
        }
        if let Some(id) = dag.nodes.keys().find(|id| !declared.contains_key(*id)) {
            return Err(DagError::MissingDependencies(id.clone()));
        }

        dag.dependencies = declared;
        dag.validate()?;
        Ok(dag)
    }

    /// Check if the DAG is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get the number of tasks in the DAG.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Add a task to the DAG with no dependencies.
    pub fn add_task(
        &mut self,
        id: impl Into<TaskId>,
        task: Arc<dyn Task<T>>,
    ) -> Result<(), DagError> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(DagError::DuplicateTask(id));
        }

        self.nodes.insert(
            id.clone(),
            TaskNode {
                id: id.clone(),
                task,
            },
        );
        self.dependencies.insert(id, BTreeSet::new());
        Ok(())
    }

    /// Add a dependency: `from` depends on `to` (to must complete before from).
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<(), DagError> {
        if !self.nodes.contains_key(from) {
            return Err(DagError::TaskNotFound(from.clone()));
        }
        if !self.nodes.contains_key(to) {
            return Err(DagError::UnknownDependency {
                from: from.clone(),
                to: to.clone(),
            });
        }

        self.dependencies
            .entry(from.clone())
            .or_default()
            .insert(to.clone());

        Ok(())
    }

    /// Get a task node by ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&TaskNode<T>> {
        self.nodes.get(id)
    }

    /// Get the dependencies of a task, in name order.
    pub fn get_dependencies(&self, id: &TaskId) -> Option<&BTreeSet<TaskId>> {
        self.dependencies.get(id)
    }

    /// Get tasks that depend on the given task (downstream tasks), in name order.
    pub fn get_downstream(&self, id: &TaskId) -> Vec<TaskId> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.contains(id))
            .map(|(task_id, _)| task_id.clone())
            .collect()
    }

    /// Get all task IDs in the DAG, in name order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.nodes.keys().cloned().collect()
    }

    /// Iterate over `(task, dependencies)` pairs in name order.
    pub fn edges(&self) -> impl Iterator<Item = (&TaskId, &BTreeSet<TaskId>)> {
        self.dependencies.iter()
    }

    /// Validate the DAG and return tasks in topological order.
    ///
    /// Among tasks that are ready at the same time, names sort first, so the
    /// order is deterministic. Returns an error if a cycle is detected.
    pub fn topological_sort(&self) -> Result<Vec<TaskId>, DagError> {
        // Kahn's algorithm
        let mut in_degree: BTreeMap<&TaskId, usize> = BTreeMap::new();
        let mut reverse_deps: BTreeMap<&TaskId, Vec<&TaskId>> = BTreeMap::new();

        for (from, deps) in &self.dependencies {
            in_degree.insert(from, deps.len());
            for to in deps {
                reverse_deps.entry(to).or_default().push(from);
            }
        }

        let mut queue: BTreeSet<&TaskId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_first() {
            result.push(id.clone());

            for next in reverse_deps.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.insert(*next);
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            let blocked: BTreeSet<&TaskId> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| *id)
                .collect();
            return Err(DagError::CycleDetected(self.trace_cycle(&blocked)));
        }

        Ok(result)
    }

    /// Walk dependency edges among the tasks Kahn's algorithm could not
    /// schedule until a task repeats. Every blocked task has a blocked
    /// dependency, so the walk always closes a cycle.
    fn trace_cycle(&self, blocked: &BTreeSet<&TaskId>) -> Vec<TaskId> {
        let mut path: Vec<&TaskId> = Vec::new();
        let mut current = blocked.first().copied();

        while let Some(id) = current {
            if let Some(pos) = path.iter().position(|seen| *seen == id) {
                return path[pos..].iter().map(|id| (*id).clone()).collect();
            }
            path.push(id);
            current = self
                .dependencies
                .get(id)
                .and_then(|deps| deps.iter().find(|dep| blocked.contains(dep)));
        }

        path.into_iter().cloned().collect()
    }

    /// Validate the DAG structure.
    pub fn validate(&self) -> Result<(), DagError> {
        for (from, deps) in &self.dependencies {
            for to in deps {
                if !self.nodes.contains_key(to) {
                    return Err(DagError::UnknownDependency {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }

        self.topological_sort()?;

        Ok(())
    }
}

impl<T> Default for Dag<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Dag<T> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

impl<T> fmt::Debug for Dag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.dependencies.iter()).finish()
    }
}

/// Builder for constructing DAGs fluently.
///
/// Dependencies may name tasks that are added later; edges are resolved in
/// [`build`](Self::build). The first error encountered is reported there.
pub struct DagBuilder<T> {
    dag: Dag<T>,
    edges: Vec<(TaskId, TaskId)>,
    error: Option<DagError>,
}

impl<T> DagBuilder<T>
where
    T: Send + Sync + 'static,
{
    /// Create a new DAG builder.
    pub fn new() -> Self {
        Self {
            dag: Dag::new(),
            edges: Vec::new(),
            error: None,
        }
    }

    /// Add a task without dependencies.
    pub fn add_task(self, id: impl Into<TaskId>, task: Arc<dyn Task<T>>) -> Self {
        self.add_task_with_deps(id, task, &[])
    }

    /// Add a task with dependencies.
    pub fn add_task_with_deps(
        mut self,
        id: impl Into<TaskId>,
        task: Arc<dyn Task<T>>,
        depends_on: &[&str],
    ) -> Self {
        let id = id.into();
        if let Err(err) = self.dag.add_task(id.clone(), task) {
            self.error.get_or_insert(err);
        }
        for dep in depends_on {
            self.edges.push((id.clone(), TaskId::new(*dep)));
        }
        self
    }

    /// Add a dependency between tasks.
    pub fn add_dependency(mut self, from: &str, to: &str) -> Self {
        self.edges.push((TaskId::new(from), TaskId::new(to)));
        self
    }

    /// Build the DAG, validating it in the process.
    pub fn build(mut self) -> Result<Dag<T>, DagError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        for (from, to) in &self.edges {
            self.dag.add_dependency(from, to)?;
        }
        self.dag.validate()?;
        Ok(self.dag)
    }
}

impl<T> Default for DagBuilder<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
