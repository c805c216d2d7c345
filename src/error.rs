use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::core::dag::GraphSnapshot;
use crate::core::task::{TaskId, TaskStatus};
use crate::run::{RunId, RunPhase};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Malformed task graph: {0}")]
    MalformedGraph(String),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Planner returned no tasks")]
    EmptyPlan,

    #[error("Tasks failed: {}", join_ids(failed))]
    PartialFailure { failed: BTreeSet<TaskId> },

    #[error("Every task failed: {}", join_ids(failed))]
    AllTasksFailed { failed: BTreeSet<TaskId> },

    #[error("Consolidation failed: {0}")]
    ConsolidationFailed(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Worker pool is full (max: {max})")]
    WorkerPoolFull { max: usize },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("No home directory")]
    NoHomeDir,

    #[error("Provider binary not found: {0}")]
    BinaryNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by the external capabilities.
///
/// These are absorbed at the worker boundary when they come from the
/// solver or search tool; planning and synthesis failures end the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),
}

/// Externally visible failure of a whole run.
///
/// Carries the phase the run was in when it failed, the error that
/// terminated it, and the last known task graph for diagnostics.
#[derive(Error, Debug)]
#[error("run {run_id} failed during {phase}: {source}")]
pub struct RunError {
    pub run_id: RunId,
    pub phase: RunPhase,
    #[source]
    pub source: Error,
    pub snapshot: Option<GraphSnapshot>,
}

impl RunError {
    /// Failed task ids recorded in the snapshot, if any.
    pub fn failed_tasks(&self) -> BTreeSet<TaskId> {
        self.snapshot
            .as_ref()
            .map(|s| s.failed_ids())
            .unwrap_or_default()
    }

    /// Serializable summary for `--json` output.
    pub fn report(&self) -> RunErrorReport {
        RunErrorReport {
            run_id: self.run_id,
            phase: self.phase,
            error: self.source.to_string(),
            snapshot: self.snapshot.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunErrorReport {
    pub run_id: RunId,
    pub phase: RunPhase,
    pub error: String,
    pub snapshot: Option<GraphSnapshot>,
}

fn join_ids(ids: &BTreeSet<TaskId>) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
