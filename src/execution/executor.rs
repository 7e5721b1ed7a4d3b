//! DAG execution engine.
//!
//! `DagExecutor` drives one run at a time per call: it asks the readiness
//! tracker for ready tasks, gathers their inputs from the result store,
//! hands them to the dispatcher, and blocks on the completion channel until
//! the graph is exhausted or a task fails.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::{AbortPolicy, ExecutorConfig};
use crate::core::dag::{Dag, DagError};
use crate::core::task::{TaskError, TaskInputs};
use crate::core::types::{RunId, TaskId};
use crate::events::{self, Event, EventBus};

use super::dispatcher::{Completion, Dispatcher};
use super::store::{ResultStore, StoreError};
use super::tracker::{ReadinessTracker, TrackerError};

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// The run has been created but nothing was dispatched yet.
    NotStarted,
    /// Tasks are being dispatched.
    Running,
    /// Every task completed.
    AllCompleted,
    /// A task failed or the run timed out.
    Aborted,
}

/// Scheduler invariant violations. Seeing one of these is a bug.
#[derive(Debug, Error)]
pub enum InternalError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run stalled: {pending} task(s) pending with nothing in flight")]
    Stalled { pending: usize },
}

/// Errors returned by [`DagExecutor::execute`].
#[derive(Error)]
pub enum ExecutionError<T> {
    /// The graph failed validation; no task ran.
    #[error("invalid graph: {0}")]
    Graph(#[from] DagError),

    /// A task failed and the run was aborted.
    #[error("task '{task_id}' failed: {source}")]
    TaskFailed {
        task_id: TaskId,
        #[source]
        source: TaskError,
        /// Results of every task that completed before the run stopped.
        partial: ResultStore<T>,
        /// Tasks that were already running and failed while the run wound down.
        also_failed: Vec<(TaskId, TaskError)>,
    },

    /// The run exceeded its configured timeout.
    #[error("run timed out after {after:?}")]
    Timeout {
        after: Duration,
        partial: ResultStore<T>,
    },

    #[error("internal scheduler error: {0}")]
    Internal(#[from] InternalError),

    /// The blocking entry point could not start a runtime.
    #[error("failed to build tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl<T> ExecutionError<T> {
    /// Name of the task whose failure aborted the run.
    pub fn failed_task(&self) -> Option<&TaskId> {
        match self {
            ExecutionError::TaskFailed { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// Results computed before the run stopped, if any were kept.
    pub fn partial(&self) -> Option<&ResultStore<T>> {
        match self {
            ExecutionError::TaskFailed { partial, .. } | ExecutionError::Timeout { partial, .. } => {
                Some(partial)
            }
            _ => None,
        }
    }

    /// Consume the error, keeping the partial results.
    pub fn into_partial(self) -> Option<ResultStore<T>> {
        match self {
            ExecutionError::TaskFailed { partial, .. } | ExecutionError::Timeout { partial, .. } => {
                Some(partial)
            }
            _ => None,
        }
    }
}

impl<T> From<TrackerError> for ExecutionError<T> {
    fn from(err: TrackerError) -> Self {
        ExecutionError::Internal(err.into())
    }
}

impl<T> From<StoreError> for ExecutionError<T> {
    fn from(err: StoreError) -> Self {
        ExecutionError::Internal(err.into())
    }
}

// Partial stores are shown by task name so `T` needs no Debug bound.
impl<T> fmt::Debug for ExecutionError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |store: &ResultStore<T>| store.task_ids().cloned().collect::<Vec<_>>();
        match self {
            ExecutionError::Graph(err) => f.debug_tuple("Graph").field(err).finish(),
            ExecutionError::TaskFailed {
                task_id,
                source,
                partial,
                also_failed,
            } => f
                .debug_struct("TaskFailed")
                .field("task_id", task_id)
                .field("source", source)
                .field("partial", &names(partial))
                .field("also_failed", also_failed)
                .finish(),
            ExecutionError::Timeout { after, partial } => f
                .debug_struct("Timeout")
                .field("after", after)
                .field("partial", &names(partial))
                .finish(),
            ExecutionError::Internal(err) => f.debug_tuple("Internal").field(err).finish(),
            ExecutionError::Runtime(err) => f.debug_tuple("Runtime").field(err).finish(),
        }
    }
}

/// Executor for running DAGs with dependency management.
///
/// The executor holds the graph and its configuration only. Every call to
/// [`execute`](Self::execute) builds fresh run state, so one executor can be
/// run repeatedly, and several executors can run at the same time.
pub struct DagExecutor<T> {
    dag: Dag<T>,
    config: ExecutorConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl<T> DagExecutor<T>
where
    T: Send + Sync + 'static,
{
    /// Create an executor with the default configuration.
    pub fn new(dag: Dag<T>) -> Self {
        Self {
            dag,
            config: ExecutorConfig::default(),
            event_bus: None,
        }
    }

    /// Builder: replace the configuration.
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder: emit lifecycle events to the given bus.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Get the graph.
    pub fn dag(&self) -> &Dag<T> {
        &self.dag
    }

    /// Get the configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every task of the graph and return their results.
    ///
    /// Independent tasks run in parallel up to the configured concurrency.
    /// The first failing task aborts the run; the error carries the results
    /// that were computed before the run stopped.
    pub async fn execute(&self) -> Result<ResultStore<T>, ExecutionError<T>> {
        let run_id = RunId::new();
        let span = info_span!(
            "dag_execution",
            run = %run_id,
            task_count = self.dag.len(),
        );
        self.execute_run(run_id).instrument(span).await
    }

    /// Run the graph on a new multi-threaded runtime, blocking the caller.
    ///
    /// Must not be called from within an async context.
    pub fn execute_blocking(&self) -> Result<ResultStore<T>, ExecutionError<T>> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(ExecutionError::Runtime)?;
        let outcome = runtime.block_on(self.execute());
        // Blocking work left over from an aborted run is not waited for.
        runtime.shutdown_background();
        outcome
    }

    async fn execute_run(&self, run_id: RunId) -> Result<ResultStore<T>, ExecutionError<T>> {
        self.dag.validate()?;

        let start = Instant::now();
        let limit = self.config.concurrency.limit();
        let bus = self.event_bus.as_ref();

        info!(
            max_concurrency = ?limit,
            on_failure = ?self.config.on_failure,
            "starting DAG execution"
        );
        events::emit(bus, || Event::run_started(run_id, self.dag.len())).await;

        let mut run = Run {
            run_id,
            dag: &self.dag,
            config: &self.config,
            event_bus: bus,
            tracker: ReadinessTracker::new(&self.dag),
            store: ResultStore::new(),
            dispatcher: Dispatcher::new(run_id, limit).with_event_bus(self.event_bus.clone()),
            state: RunState::NotStarted,
        };
        let outcome = run.drive().await;
        let duration = start.elapsed();

        let completed = match &outcome {
            Ok(store) => store.len(),
            Err(err) => err.partial().map_or(0, ResultStore::len),
        };
        match &outcome {
            Ok(_) => info!(
                completed,
                duration_ms = duration.as_millis() as u64,
                "DAG execution completed"
            ),
            Err(err) => warn!(
                completed,
                duration_ms = duration.as_millis() as u64,
                error = %err,
                "DAG execution aborted"
            ),
        }
        events::emit(bus, || {
            Event::run_finished(run_id, run.state, completed, duration)
        })
        .await;

        outcome
    }
}

/// State of one run. Owned by the orchestration loop alone.
struct Run<'a, T> {
    run_id: RunId,
    dag: &'a Dag<T>,
    config: &'a ExecutorConfig,
    event_bus: Option<&'a Arc<EventBus>>,
    tracker: ReadinessTracker,
    store: ResultStore<T>,
    dispatcher: Dispatcher<T>,
    state: RunState,
}

impl<T> Run<'_, T>
where
    T: Send + Sync + 'static,
{
    async fn drive(&mut self) -> Result<ResultStore<T>, ExecutionError<T>> {
        self.state = RunState::Running;
        // A timeout too large to represent as an instant never fires.
        let deadline = self.config.run_timeout.and_then(|after| {
            tokio::time::Instant::now()
                .checked_add(after)
                .map(|at| (after, at))
        });

        while self.tracker.is_active() {
            self.dispatch_ready().await?;

            let next = match deadline {
                Some((after, at)) => {
                    match tokio::time::timeout_at(at, self.dispatcher.next_completion()).await {
                        Ok(next) => next,
                        Err(_) => return Err(self.time_out(after).await),
                    }
                }
                None => self.dispatcher.next_completion().await,
            };

            let Some(completion) = next else {
                return Err(InternalError::Stalled {
                    pending: self.tracker.counts().pending,
                }
                .into());
            };

            let Completion {
                task_id,
                outcome,
                duration,
            } = completion;
            match outcome {
                Ok(value) => {
                    self.store.set(task_id.clone(), value)?;
                    let unblocked = self.tracker.mark_completed(&task_id)?;
                    debug!(
                        task = %task_id,
                        duration_ms = duration.as_millis() as u64,
                        unblocked = unblocked.len(),
                        "task result recorded"
                    );
                }
                Err(source) => {
                    self.tracker.mark_failed(&task_id)?;
                    let deadline = deadline.map(|(_, at)| at);
                    return Err(self.abort(task_id, source, deadline).await);
                }
            }
        }

        self.state = RunState::AllCompleted;
        Ok(std::mem::take(&mut self.store))
    }

    /// Submit every ready task with its gathered inputs.
    async fn dispatch_ready(&mut self) -> Result<(), ExecutionError<T>> {
        let dag = self.dag;
        let run_id = self.run_id;

        for task_id in self.tracker.ready() {
            let node = dag
                .get_task(&task_id)
                .ok_or_else(|| TrackerError::UnknownTask(task_id.clone()))?;
            let inputs = match dag.get_dependencies(&task_id) {
                Some(dependencies) => self.store.gather(dependencies)?,
                None => TaskInputs::empty(),
            };

            info!(task = %task_id, inputs = inputs.len(), "submitting task");
            events::emit(self.event_bus, || {
                Event::task_submitted(run_id, task_id.clone())
            })
            .await;
            self.dispatcher.submit(task_id, Arc::clone(&node.task), inputs);
        }
        Ok(())
    }

    /// Stop the run after `task_id` failed.
    ///
    /// Tasks that never acquired a worker are cancelled. Running tasks are
    /// either awaited or aborted depending on the abort policy. Awaiting
    /// stops at the run deadline, after which the remaining work is aborted.
    async fn abort(
        &mut self,
        task_id: TaskId,
        source: TaskError,
        deadline: Option<tokio::time::Instant>,
    ) -> ExecutionError<T> {
        self.state = RunState::Aborted;
        warn!(
            task = %task_id,
            error = %source,
            in_flight = self.dispatcher.in_flight(),
            policy = ?self.config.on_failure,
            "task failed, aborting run"
        );
        self.dispatcher.cancel_pending();

        let mut also_failed = Vec::new();
        let result = match self.config.on_failure {
            AbortPolicy::Wait => {
                let mut result = Ok(());
                loop {
                    let next = match deadline {
                        Some(at) => {
                            tokio::time::timeout_at(at, self.dispatcher.next_completion()).await
                        }
                        None => Ok(self.dispatcher.next_completion().await),
                    };
                    match next {
                        Ok(Some(completion)) => {
                            result = result.and(self.settle(completion, &mut also_failed));
                        }
                        Ok(None) => break,
                        Err(_) => {
                            warn!(
                                in_flight = self.dispatcher.in_flight(),
                                "run deadline reached while waiting, aborting running tasks"
                            );
                            for completion in self.dispatcher.abort_running().await {
                                result = result.and(self.settle(completion, &mut also_failed));
                            }
                            break;
                        }
                    }
                }
                result
            }
            AbortPolicy::Cancel => {
                let delivered = self.dispatcher.abort_running().await;
                delivered
                    .into_iter()
                    .try_for_each(|completion| self.settle(completion, &mut also_failed))
            }
        };
        if let Err(err) = result {
            return err.into();
        }

        ExecutionError::TaskFailed {
            task_id,
            source,
            partial: std::mem::take(&mut self.store),
            also_failed,
        }
    }

    async fn time_out(&mut self, after: Duration) -> ExecutionError<T> {
        self.state = RunState::Aborted;
        warn!(
            after_ms = after.as_millis() as u64,
            in_flight = self.dispatcher.in_flight(),
            "run timed out, aborting"
        );

        let mut failed = Vec::new();
        for completion in self.dispatcher.abort_running().await {
            if let Err(err) = self.settle(completion, &mut failed) {
                return err.into();
            }
        }

        ExecutionError::Timeout {
            after,
            partial: std::mem::take(&mut self.store),
        }
    }

    /// Record a completion that arrived while the run was winding down.
    fn settle(
        &mut self,
        completion: Completion<T>,
        also_failed: &mut Vec<(TaskId, TaskError)>,
    ) -> Result<(), InternalError> {
        let Completion {
            task_id, outcome, ..
        } = completion;

        match outcome {
            Ok(value) => {
                debug!(task = %task_id, "in-flight task completed after abort");
                self.store.set(task_id.clone(), value)?;
                self.tracker.mark_completed(&task_id)?;
            }
            Err(err) if err.is_cancelled() => {
                debug!(task = %task_id, "task cancelled before start");
                self.tracker.mark_failed(&task_id)?;
            }
            Err(err) => {
                warn!(task = %task_id, error = %err, "in-flight task also failed");
                self.tracker.mark_failed(&task_id)?;
                also_failed.push((task_id, err));
            }
        }
        Ok(())
    }
}
