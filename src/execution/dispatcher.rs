//! Concurrent dispatch of ready tasks.
//!
//! Every submitted task becomes a tokio task that waits for a worker permit,
//! runs the computation, and sends exactly one [`Completion`] back over an
//! unbounded channel. The orchestration loop blocks on that channel instead
//! of polling in-flight work.
//!
//! The computation itself runs in a nested tokio task so that a panic is
//! observed as a `JoinError` and reported as [`TaskError::Panicked`] rather
//! than tearing down the worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{Instrument, debug, info_span};

use crate::core::task::{Task, TaskError, TaskInputs};
use crate::core::types::{RunId, TaskId};
use crate::events::{self, Event, EventBus};

/// Outcome of one submitted task.
#[derive(Debug)]
pub struct Completion<T> {
    /// The task that finished.
    pub task_id: TaskId,
    /// The computed value, or why there is none.
    pub outcome: Result<T, TaskError>,
    /// Time spent executing, excluding time queued for a worker.
    pub duration: Duration,
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Worker pool for one run.
pub struct Dispatcher<T> {
    run_id: RunId,
    limit: Option<usize>,
    semaphore: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<Completion<T>>,
    rx: mpsc::UnboundedReceiver<Completion<T>>,
    workers: JoinSet<()>,
    in_flight: usize,
    event_bus: Option<Arc<EventBus>>,
}

impl<T> Dispatcher<T>
where
    T: Send + Sync + 'static,
{
    /// Create a pool running at most `limit` tasks at once (`None` = no limit).
    pub fn new(run_id: RunId, limit: Option<usize>) -> Self {
        let permits = limit.map_or(Semaphore::MAX_PERMITS, |n| n.max(1));
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            run_id,
            limit,
            semaphore: Arc::new(Semaphore::new(permits)),
            tx,
            rx,
            workers: JoinSet::new(),
            in_flight: 0,
            event_bus: None,
        }
    }

    /// Builder: emit task events to the given bus.
    pub fn with_event_bus(mut self, event_bus: Option<Arc<EventBus>>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Get the concurrency limit, `None` when unbounded.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Number of submitted tasks whose completion has not been received.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Get the number of idle workers.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Submit a task with its gathered inputs.
    pub fn submit(&mut self, task_id: TaskId, task: Arc<dyn Task<T>>, inputs: TaskInputs<T>) {
        self.in_flight += 1;

        let run_id = self.run_id;
        let semaphore = Arc::clone(&self.semaphore);
        let tx = self.tx.clone();
        let event_bus = self.event_bus.clone();
        let span = info_span!("dag_task", task = %task_id);

        self.workers.spawn(
            async move {
                let bus = event_bus.as_ref();

                let Ok(_permit) = semaphore.acquire_owned().await else {
                    debug!("worker pool closed, task not started");
                    events::emit(bus, || Event::task_cancelled(run_id, task_id.clone())).await;
                    let _ = tx.send(Completion {
                        task_id,
                        outcome: Err(TaskError::Cancelled),
                        duration: Duration::ZERO,
                    });
                    return;
                };

                debug!("task started");
                events::emit(bus, || Event::task_started(run_id, task_id.clone())).await;

                let start = Instant::now();
                let handle = tokio::spawn(async move { task.execute(inputs).await });
                let _guard = AbortOnDrop(handle.abort_handle());
                let outcome = match handle.await {
                    Ok(result) => result,
                    Err(err) if err.is_panic() => Err(TaskError::from_panic(err.into_panic())),
                    Err(_) => Err(TaskError::Cancelled),
                };
                let duration = start.elapsed();

                match &outcome {
                    Ok(_) => {
                        debug!(duration_ms = %duration.as_millis(), "task completed");
                        events::emit(bus, || {
                            Event::task_completed(run_id, task_id.clone(), duration)
                        })
                        .await;
                    }
                    Err(err) => {
                        debug!(error = %err, "task failed");
                        events::emit(bus, || {
                            Event::task_failed(run_id, task_id.clone(), err.to_string())
                        })
                        .await;
                    }
                }

                let _ = tx.send(Completion {
                    task_id,
                    outcome,
                    duration,
                });
            }
            .instrument(span),
        );
    }

    /// Wait for the next task to finish.
    ///
    /// Returns `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<Completion<T>> {
        if self.in_flight == 0 {
            return None;
        }
        let completion = self.rx.recv().await?;
        self.in_flight -= 1;
        Some(completion)
    }

    /// Stop handing out workers. Submitted tasks that have not started
    /// complete with [`TaskError::Cancelled`]; running tasks are unaffected.
    pub fn cancel_pending(&self) {
        self.semaphore.close();
    }

    /// Abort every in-flight task and wait for the workers to wind down.
    ///
    /// Returns the completions that were already delivered. Async tasks are
    /// interrupted at their next await point; blocking computations keep
    /// running on the blocking pool but their results are dropped.
    pub async fn abort_running(&mut self) -> Vec<Completion<T>> {
        self.semaphore.close();
        self.workers.abort_all();
        while self.workers.join_next().await.is_some() {}

        let mut delivered = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            delivered.push(completion);
        }
        self.in_flight = 0;
        delivered
    }
}
