//! Core domain models for planex orchestration.
//!
//! This module contains the fundamental data structures used throughout
//! the orchestration system: tasks and the dependency graph that owns them.

pub mod dag;
pub mod task;

pub use dag::{GraphSnapshot, TaskGraph};
pub use task::{DependencyResults, Outcome, Task, TaskDescriptor, TaskId, TaskStatus};
