//! Executor configuration types.
//!
//! ```yaml
//! max_concurrency: 8        # a worker count, `auto`, or `unbounded`
//! on_failure: wait          # `wait` for running tasks, or `cancel` them
//! run_timeout_secs: 30.5    # optional
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::ConfigError;

/// Fallback pool size when the host's parallelism cannot be queried.
const DEFAULT_WORKERS: usize = 4;

/// Size of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "ConcurrencySetting", into = "ConcurrencySetting")]
pub enum Concurrency {
    /// One worker per available hardware thread.
    #[default]
    Auto,
    /// A fixed number of workers (at least 1).
    Bounded(usize),
    /// No limit: every ready task starts immediately. Suits I/O-bound tasks.
    Unbounded,
}

impl Concurrency {
    /// Maximum number of tasks that may execute at once, or `None` when unbounded.
    pub fn limit(&self) -> Option<usize> {
        match self {
            Concurrency::Auto => Some(
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(DEFAULT_WORKERS),
            ),
            Concurrency::Bounded(n) => Some((*n).max(1)),
            Concurrency::Unbounded => None,
        }
    }
}

/// On-disk form of [`Concurrency`]: a number or a keyword.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ConcurrencySetting {
    Workers(usize),
    Keyword(String),
}

impl TryFrom<ConcurrencySetting> for Concurrency {
    type Error = String;

    fn try_from(setting: ConcurrencySetting) -> Result<Self, Self::Error> {
        match setting {
            ConcurrencySetting::Workers(0) => Err("max_concurrency cannot be zero".to_string()),
            ConcurrencySetting::Workers(n) => Ok(Concurrency::Bounded(n)),
            ConcurrencySetting::Keyword(word) => match word.as_str() {
                "auto" => Ok(Concurrency::Auto),
                "unbounded" => Ok(Concurrency::Unbounded),
                other => Err(format!(
                    "invalid max_concurrency '{}': expected a number, 'auto' or 'unbounded'",
                    other
                )),
            },
        }
    }
}

impl From<Concurrency> for ConcurrencySetting {
    fn from(concurrency: Concurrency) -> Self {
        match concurrency {
            Concurrency::Auto => ConcurrencySetting::Keyword("auto".to_string()),
            Concurrency::Bounded(n) => ConcurrencySetting::Workers(n),
            Concurrency::Unbounded => ConcurrencySetting::Keyword("unbounded".to_string()),
        }
    }
}

/// What happens to tasks already running when another task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Let running tasks finish. Successful results join the partial store.
    #[default]
    Wait,
    /// Abort running tasks at their next await point.
    Cancel,
}

/// Configuration for a [`DagExecutor`](crate::DagExecutor).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Worker pool size.
    #[serde(rename = "max_concurrency")]
    pub concurrency: Concurrency,

    /// Behaviour of in-flight tasks after a failure.
    pub on_failure: AbortPolicy,

    /// Optional limit on the duration of a whole run.
    #[serde(
        rename = "run_timeout_secs",
        with = "serde_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub run_timeout: Option<Duration>,
}

impl ExecutorConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the worker pool size.
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Builder: use a fixed number of workers.
    pub fn with_max_concurrency(self, workers: usize) -> Self {
        self.with_concurrency(Concurrency::Bounded(workers))
    }

    /// Builder: set the abort policy.
    pub fn with_abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Builder: limit the duration of a run.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == Concurrency::Bounded(0) {
            return Err(ConfigError::InvalidConfig(
                "max_concurrency cannot be zero".into(),
            ));
        }
        if self.run_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidConfig(
                "run_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Serde helper for an optional Duration, stored as (fractional) seconds.
mod serde_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<f64>::deserialize(deserializer)? {
            None => Ok(None),
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
