//! Lifecycle events and event handling.
//!
//! Executors emit events through an optional [`EventBus`]. Nothing in the
//! library requires a handler to be registered; tracing output is produced
//! regardless.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{RunId, TaskId};
use crate::execution::RunState;

/// Lifecycle events emitted during execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A run has started.
    RunStarted {
        run_id: RunId,
        task_count: usize,
        timestamp: Instant,
    },

    /// A task was handed to the dispatcher.
    TaskSubmitted {
        run_id: RunId,
        task_id: TaskId,
        timestamp: Instant,
    },

    /// A task acquired a worker and started executing.
    TaskStarted {
        run_id: RunId,
        task_id: TaskId,
        timestamp: Instant,
    },

    /// A task completed successfully.
    TaskCompleted {
        run_id: RunId,
        task_id: TaskId,
        duration: Duration,
        timestamp: Instant,
    },

    /// A task failed with an error.
    TaskFailed {
        run_id: RunId,
        task_id: TaskId,
        error: String,
        timestamp: Instant,
    },

    /// A submitted task was cancelled before it started.
    TaskCancelled {
        run_id: RunId,
        task_id: TaskId,
        timestamp: Instant,
    },

    /// A run reached a terminal state.
    RunFinished {
        run_id: RunId,
        state: RunState,
        completed: usize,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::RunStarted { timestamp, .. } => *timestamp,
            Event::TaskSubmitted { timestamp, .. } => *timestamp,
            Event::TaskStarted { timestamp, .. } => *timestamp,
            Event::TaskCompleted { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
            Event::TaskCancelled { timestamp, .. } => *timestamp,
            Event::RunFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Get the run the event belongs to.
    pub fn run_id(&self) -> RunId {
        match self {
            Event::RunStarted { run_id, .. }
            | Event::TaskSubmitted { run_id, .. }
            | Event::TaskStarted { run_id, .. }
            | Event::TaskCompleted { run_id, .. }
            | Event::TaskFailed { run_id, .. }
            | Event::TaskCancelled { run_id, .. }
            | Event::RunFinished { run_id, .. } => *run_id,
        }
    }

    /// Get the task the event refers to, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Event::TaskSubmitted { task_id, .. }
            | Event::TaskStarted { task_id, .. }
            | Event::TaskCompleted { task_id, .. }
            | Event::TaskFailed { task_id, .. }
            | Event::TaskCancelled { task_id, .. } => Some(task_id),
            Event::RunStarted { .. } | Event::RunFinished { .. } => None,
        }
    }

    /// Create a RunStarted event.
    pub fn run_started(run_id: RunId, task_count: usize) -> Self {
        Event::RunStarted {
            run_id,
            task_count,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskSubmitted event.
    pub fn task_submitted(run_id: RunId, task_id: TaskId) -> Self {
        Event::TaskSubmitted {
            run_id,
            task_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(run_id: RunId, task_id: TaskId) -> Self {
        Event::TaskStarted {
            run_id,
            task_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskCompleted event.
    pub fn task_completed(run_id: RunId, task_id: TaskId, duration: Duration) -> Self {
        Event::TaskCompleted {
            run_id,
            task_id,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(run_id: RunId, task_id: TaskId, error: String) -> Self {
        Event::TaskFailed {
            run_id,
            task_id,
            error,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskCancelled event.
    pub fn task_cancelled(run_id: RunId, task_id: TaskId) -> Self {
        Event::TaskCancelled {
            run_id,
            task_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a RunFinished event.
    pub fn run_finished(
        run_id: RunId,
        state: RunState,
        completed: usize,
        duration: Duration,
    ) -> Self {
        Event::RunFinished {
            run_id,
            state,
            completed,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Emit through an optional bus.
pub(crate) async fn emit(bus: Option<&Arc<EventBus>>, event: impl FnOnce() -> Event) {
    if let Some(bus) = bus {
        bus.emit(event()).await;
    }
}
