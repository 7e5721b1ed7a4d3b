//! dagex-demo - Runs a small diamond-shaped DAG.
//!
//! Usage:
//!   dagex-demo                     Run A, B <- A, C, D <- {B, C}
//!   dagex-demo -j 1                Run with a single worker
//!   dagex-demo --fail C            Make task C fail and show the partial results
//!   dagex-demo --config exec.yaml  Load executor settings from YAML

use clap::Parser;
use dagex::{
    DagBuilder, DagExecutor, Event, EventBus, EventHandler, ExecutorConfig, Task, TaskError,
    TaskInputs, task_fn,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const TASKS: [&str; 4] = ["A", "B", "C", "D"];

/// dagex-demo - Run a diamond-shaped DAG of simulated tasks
#[derive(Parser)]
#[command(name = "dagex-demo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Maximum tasks running at once (default: one per CPU)
    #[arg(short = 'j', long)]
    max_concurrency: Option<usize>,

    /// Simulated work per task, in milliseconds
    #[arg(long, default_value = "500")]
    delay_ms: u64,

    /// Load executor settings from a YAML file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Make the named task fail
    #[arg(long, value_name = "TASK")]
    fail: Option<String>,
}

/// Logs task lifecycle events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::TaskStarted { task_id, .. } => {
                info!("  Task '{}' started", task_id);
            }
            Event::TaskCompleted {
                task_id, duration, ..
            } => {
                info!("  Task '{}' completed in {:?}", task_id, duration);
            }
            Event::TaskFailed { task_id, error, .. } => {
                warn!("  Task '{}' failed: {}", task_id, error);
            }
            Event::TaskCancelled { task_id, .. } => {
                warn!("  Task '{}' cancelled", task_id);
            }
            Event::RunFinished {
                state, duration, ..
            } => {
                info!("Run finished ({:?}) in {:?}", state, duration);
            }
            _ => {}
        }
    }
}

/// A task that sleeps, then describes the results it was given.
fn demo_task(name: &'static str, delay: Duration, fail: bool) -> Arc<dyn Task<String>> {
    task_fn(move |inputs: TaskInputs<String>| async move {
        info!("Executing Task {}", name);
        tokio::time::sleep(delay).await;

        if fail {
            return Err(TaskError::ExecutionFailed(format!(
                "task {} was asked to fail",
                name
            )));
        }

        let result = if inputs.is_empty() {
            format!("Result from {}", name)
        } else {
            let upstream: Vec<&str> = inputs.values().map(String::as_str).collect();
            format!("Result from {}, based on {}", name, upstream.join(" and "))
        };
        info!("Task {} completed with result: {}", name, result);
        Ok(result)
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading executor settings from: {}", path.display());
            ExecutorConfig::from_yaml_file(path)?
        }
        None => ExecutorConfig::default(),
    };
    if let Some(workers) = cli.max_concurrency {
        config = config.with_max_concurrency(workers);
    }
    config.validate()?;

    if let Some(name) = &cli.fail {
        if !TASKS.contains(&name.as_str()) {
            return Err(format!(
                "unknown task '{}', expected one of: {}",
                name,
                TASKS.join(", ")
            )
            .into());
        }
    }
    let fails = |name: &str| cli.fail.as_deref() == Some(name);
    let delay = Duration::from_millis(cli.delay_ms);

    let dag = DagBuilder::new()
        .add_task("A", demo_task("A", delay, fails("A")))
        .add_task_with_deps("B", demo_task("B", delay, fails("B")), &["A"])
        .add_task("C", demo_task("C", delay, fails("C")))
        .add_task_with_deps("D", demo_task("D", delay, fails("D")), &["B", "C"])
        .build()?;

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let executor = DagExecutor::new(dag)
        .with_config(config)
        .with_event_bus(event_bus);

    match executor.execute().await {
        Ok(results) => {
            println!("\n--- Task Results ---");
            for (name, result) in results.iter() {
                println!("{}: {}", name, result);
            }
            Ok(())
        }
        Err(e) => {
            error!("Execution failed: {}", e);
            if let Some(partial) = e.partial() {
                println!("\n--- Partial Results ---");
                for (name, result) in partial.iter() {
                    println!("{}: {}", name, result);
                }
            }
            Err(e.into())
        }
    }
}
