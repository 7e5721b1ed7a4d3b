//! Core types: task names, the task trait, and the dependency graph.

pub mod dag;
pub mod task;
pub mod types;
