//! Testing utilities for users of the dagex library.
//!
//! This module provides task helpers for exercising graphs without writing
//! real computations:
//!
//! - [`ConstTask`]: returns a fixed value, optionally after a delay
//! - [`FailingTask`]: fails a configurable number of times, or always
//! - [`RecordingTask`]: wraps another task and logs each invocation to an
//!   [`ExecutionLog`]
//! - [`ConcurrencyProbe`]: measures how many tasks run at the same time
//! - [`RecordingHandler`]: an event handler that keeps every event it sees

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::core::task::{Task, TaskError, TaskInputs};
use crate::core::types::TaskId;
use crate::events::{Event, EventHandler};

/// A task that returns a clone of a fixed value.
///
/// # Example
///
/// ```
/// use dagex::testing::ConstTask;
/// use std::time::Duration;
///
/// let task = ConstTask::new(42).with_delay(Duration::from_millis(5));
/// ```
pub struct ConstTask<T> {
    value: T,
    delay: Duration,
}

impl<T> ConstTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a task that returns `value`.
    pub fn new(value: T) -> Self {
        Self {
            value,
            delay: Duration::ZERO,
        }
    }

    /// Sleep for `delay` before returning.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Wrap as a shareable task.
    pub fn shared(self) -> Arc<dyn Task<T>> {
        Arc::new(self)
    }
}

#[async_trait]
impl<T> Task<T> for ConstTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn execute(&self, _inputs: TaskInputs<T>) -> Result<T, TaskError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.value.clone())
    }
}

/// A task that fails a configurable number of times before succeeding.
///
/// The failure counter is shared by every run that uses the task, so a
/// flaky task can be used to show that a second run succeeds after the
/// first one aborted.
///
/// # Example
///
/// ```
/// use dagex::testing::FailingTask;
///
/// // Fails on the first call, returns 7 from then on.
/// let flaky = FailingTask::flaky(1, 7);
///
/// // Never succeeds.
/// let broken = FailingTask::<i32>::always("disk on fire");
/// ```
pub struct FailingTask<T> {
    state: Mutex<FailingTaskState>,
    total_failures: u32,
    value: Option<T>,
    error_message: String,
    delay: Duration,
}

struct FailingTaskState {
    failures_remaining: u32,
    call_count: u32,
}

impl<T> FailingTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn build(fail_count: u32, value: Option<T>, message: String) -> Self {
        Self {
            state: Mutex::new(FailingTaskState {
                failures_remaining: fail_count,
                call_count: 0,
            }),
            total_failures: fail_count,
            value,
            error_message: message,
            delay: Duration::ZERO,
        }
    }

    /// Create a task that always fails with `message`.
    pub fn always(message: impl Into<String>) -> Self {
        Self::build(u32::MAX, None, message.into())
    }

    /// Create a task that fails `fail_count` times, then returns `value`.
    pub fn flaky(fail_count: u32, value: T) -> Self {
        Self::build(
            fail_count,
            Some(value),
            "intentional test failure".to_string(),
        )
    }

    /// Use a custom error message.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    /// Sleep for `delay` before failing or succeeding.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Get the number of failures remaining before success.
    pub async fn failures_remaining(&self) -> u32 {
        self.state.lock().await.failures_remaining
    }

    /// Get the number of times this task has been called.
    pub async fn call_count(&self) -> u32 {
        self.state.lock().await.call_count
    }

    /// Reset the failure counter for reuse.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.failures_remaining = self.total_failures;
        state.call_count = 0;
    }
}

#[async_trait]
impl<T> Task<T> for FailingTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn execute(&self, _inputs: TaskInputs<T>) -> Result<T, TaskError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        // Check-and-decrement under one lock so concurrent runs agree on the count.
        let mut state = self.state.lock().await;
        state.call_count += 1;

        match &self.value {
            Some(value) if state.failures_remaining == 0 => Ok(value.clone()),
            _ => {
                state.failures_remaining = state.failures_remaining.saturating_sub(1);
                Err(TaskError::ExecutionFailed(self.error_message.clone()))
            }
        }
    }
}

/// One recorded call of a [`RecordingTask`].
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The recorded task.
    pub task_id: TaskId,
    /// Names of the inputs the task received, in the order received.
    pub inputs: Vec<TaskId>,
    /// When the computation started.
    pub started: Instant,
    /// When the computation returned.
    pub finished: Instant,
}

impl Invocation {
    /// True if the two calls were executing at the same time.
    pub fn overlaps(&self, other: &Invocation) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

/// Shared log of task invocations.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<std::sync::Mutex<Vec<Invocation>>>,
}

impl ExecutionLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, invocation: Invocation) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation);
    }

    /// Every recorded invocation, in completion order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Task names in the order their computations started.
    pub fn start_order(&self) -> Vec<TaskId> {
        let mut invocations = self.invocations();
        invocations.sort_by_key(|invocation| invocation.started);
        invocations
            .into_iter()
            .map(|invocation| invocation.task_id)
            .collect()
    }

    /// Number of times the named task ran.
    pub fn call_count(&self, task: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|invocation| invocation.task_id.as_str() == task)
            .count()
    }

    /// The invocation of the named task, if it ran.
    pub fn get(&self, task: &str) -> Option<Invocation> {
        self.invocations()
            .into_iter()
            .find(|invocation| invocation.task_id.as_str() == task)
    }

    /// True if any two recorded calls ran at the same time.
    pub fn any_overlap(&self) -> bool {
        let invocations = self.invocations();
        invocations.iter().enumerate().any(|(i, a)| {
            invocations[i + 1..]
                .iter()
                .any(|b| a.overlaps(b))
        })
    }

    /// Number of recorded invocations.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A task that records each call to an [`ExecutionLog`] and then delegates.
pub struct RecordingTask<T> {
    task_id: TaskId,
    inner: Arc<dyn Task<T>>,
    log: ExecutionLog,
}

impl<T> RecordingTask<T>
where
    T: Send + Sync + 'static,
{
    /// Record calls of `inner` under the given name.
    pub fn new(task_id: impl Into<TaskId>, inner: Arc<dyn Task<T>>, log: &ExecutionLog) -> Self {
        Self {
            task_id: task_id.into(),
            inner,
            log: log.clone(),
        }
    }

    /// Wrap as a shareable task.
    pub fn shared(self) -> Arc<dyn Task<T>> {
        Arc::new(self)
    }
}

#[async_trait]
impl<T> Task<T> for RecordingTask<T>
where
    T: Send + Sync + 'static,
{
    async fn execute(&self, inputs: TaskInputs<T>) -> Result<T, TaskError> {
        let names = inputs.names().cloned().collect();
        let started = Instant::now();
        let result = self.inner.execute(inputs).await;
        self.log.push(Invocation {
            task_id: self.task_id.clone(),
            inputs: names,
            started,
            finished: Instant::now(),
        });
        result
    }

    fn description(&self) -> Option<&str> {
        self.inner.description()
    }
}

/// Tracks how many probe tasks are executing at once.
///
/// # Example
///
/// ```
/// use dagex::testing::ConcurrencyProbe;
/// use std::time::Duration;
///
/// let probe = ConcurrencyProbe::new();
/// let task = probe.task(1, Duration::from_millis(10));
/// assert_eq!(probe.peak(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    counters: Arc<ProbeCounters>,
}

#[derive(Debug, Default)]
struct ProbeCounters {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    /// Create a probe with no tasks running.
    pub fn new() -> Self {
        Self::default()
    }

    /// A task that holds the probe for `hold`, then returns `value`.
    pub fn task<T>(&self, value: T, hold: Duration) -> Arc<dyn Task<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        Arc::new(ProbeTask {
            counters: Arc::clone(&self.counters),
            value,
            hold,
        })
    }

    /// Highest number of probe tasks seen running together.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Number of probe tasks running right now.
    pub fn current(&self) -> usize {
        self.counters.current.load(Ordering::SeqCst)
    }
}

struct ProbeTask<T> {
    counters: Arc<ProbeCounters>,
    value: T,
    hold: Duration,
}

#[async_trait]
impl<T> Task<T> for ProbeTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn execute(&self, _inputs: TaskInputs<T>) -> Result<T, TaskError> {
        let now = self.counters.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.counters.current.fetch_sub(1, Ordering::SeqCst);
        Ok(self.value.clone())
    }
}

/// Event handler that records every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    /// Create a handler with no recorded events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event, in emission order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Recorded events concerning one task.
    pub async fn events_for(&self, task: &str) -> Vec<Event> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| event.task_id().is_some_and(|id| id.as_str() == task))
            .cloned()
            .collect()
    }

    /// Drop all recorded events.
    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
