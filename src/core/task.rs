//! Task data model for the execution DAG.
//!
//! Tasks are the atomic units of work handed to workers. Each task tracks
//! its status, its dependencies, timing, and the result or error produced
//! by the worker that ran it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a task within one graph, assigned by the planner.
///
/// Ordered lexicographically; dispatch order among ready tasks follows
/// this ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task status in its lifecycle.
///
/// Transitions only move forward:
/// Pending -> Ready -> Running -> Done | Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, dependencies not yet known to be satisfied.
    #[default]
    Pending,
    /// Dependencies satisfied, waiting for a worker slot.
    Ready,
    /// Handed to a worker.
    Running,
    /// Finished with a result.
    Done,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// Check whether moving from `self` to `next` is a legal forward step.
    pub fn can_transition(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Ready)
                | (TaskStatus::Ready, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Done)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Planner-provided description of one task, before graph construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub description: String,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    /// Objective check that defines success for the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,
    /// Hints, assumptions or constraints from the planner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TaskDescriptor {
    pub fn new<I, D>(id: &str, description: &str, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<TaskId>,
    {
        Self {
            id: TaskId::from(id),
            description: description.to_string(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            success_criteria: None,
            notes: None,
        }
    }

    pub fn with_success_criteria(mut self, criteria: &str) -> Self {
        self.success_criteria = Some(criteria.to_string());
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }
}

/// Result of one worker invocation, before it is applied to the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    Success { result: String },
    Failure { error: String },
}

impl Outcome {
    pub fn success(result: impl Into<String>) -> Self {
        Self::Success {
            result: result.into(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// A single task in the execution DAG.
///
/// `result` is present iff the status is `Done`, and `error` iff it is
/// `Failed`. Both are only reachable through the transition methods, and
/// deserialization rejects records that break the pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TaskRecord")]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub dependencies: BTreeSet<TaskId>,
    pub success_criteria: Option<String>,
    pub notes: Option<String>,
    status: TaskStatus,
    result: Option<String>,
    error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Wire form of [`Task`], checked before it becomes one.
#[derive(Deserialize)]
struct TaskRecord {
    id: TaskId,
    description: String,
    #[serde(default)]
    dependencies: BTreeSet<TaskId>,
    #[serde(default)]
    success_criteria: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    status: TaskStatus,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRecord> for Task {
    type Error = String;

    fn try_from(record: TaskRecord) -> std::result::Result<Self, Self::Error> {
        let done = record.status == TaskStatus::Done;
        let failed = record.status == TaskStatus::Failed;
        if record.result.is_some() != done {
            return Err(format!(
                "task {}: result must be present exactly when status is done (status {})",
                record.id, record.status
            ));
        }
        if record.error.is_some() != failed {
            return Err(format!(
                "task {}: error must be present exactly when status is failed (status {})",
                record.id, record.status
            ));
        }
        Ok(Self {
            id: record.id,
            description: record.description,
            dependencies: record.dependencies,
            success_criteria: record.success_criteria,
            notes: record.notes,
            status: record.status,
            result: record.result,
            error: record.error,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
        })
    }
}

impl Task {
    /// Create a pending task from its descriptor.
    pub fn from_descriptor(descriptor: TaskDescriptor) -> Self {
        Self {
            id: descriptor.id,
            description: descriptor.description,
            dependencies: descriptor.dependencies,
            success_criteria: descriptor.success_criteria,
            notes: descriptor.notes,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition(next) {
            return Err(Error::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Pending -> Ready.
    pub(crate) fn mark_ready(&mut self) -> Result<()> {
        self.transition(TaskStatus::Ready)
    }

    /// Ready -> Running, recording the start time.
    pub(crate) fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Done or Failed depending on the outcome.
    pub(crate) fn finish(&mut self, outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Success { result } => {
                self.transition(TaskStatus::Done)?;
                self.result = Some(result);
            }
            Outcome::Failure { error } => {
                self.transition(TaskStatus::Failed)?;
                self.error = Some(error);
            }
        }
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }
}

/// Immutable view of dependency outputs handed to a worker.
pub type DependencyResults = BTreeMap<TaskId, String>;
