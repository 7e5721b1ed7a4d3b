//! Executor configuration.
//!
//! Settings can be built in code or loaded from YAML.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{AbortPolicy, Concurrency, ExecutorConfig};
