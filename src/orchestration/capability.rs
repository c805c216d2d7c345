//! Boundary capabilities consumed by the orchestration core.
//!
//! Planning, solving, searching and synthesis are provided from outside
//! (an LLM CLI, an HTTP search API, or fakes in tests). The core only
//! depends on these traits and receives implementations at construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::task::{DependencyResults, Task, TaskDescriptor, TaskId};
use crate::error::CapabilityError;

pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

/// Output of the planning capability: the task list plus an optional
/// restatement of the goal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub goal: Option<String>,
    pub tasks: Vec<TaskDescriptor>,
}

/// Turns a free-text query into task descriptors.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, query: &str) -> CapabilityResult<Plan>;
}

/// Everything the solver needs to perform one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveRequest {
    pub task_id: TaskId,
    pub description: String,
    pub success_criteria: Option<String>,
    pub notes: Option<String>,
    /// Results of the task's dependencies.
    pub context: DependencyResults,
}

impl SolveRequest {
    pub fn new(task: &Task, context: DependencyResults) -> Self {
        Self {
            task_id: task.id.clone(),
            description: task.description.clone(),
            success_criteria: task.success_criteria.clone(),
            notes: task.notes.clone(),
            context,
        }
    }

    /// Render the request as a worker prompt.
    pub fn prompt(&self) -> String {
        let inputs = if self.context.is_empty() {
            "None".to_string()
        } else {
            self.context
                .iter()
                .map(|(id, result)| format!("[{}]\n{}", id, result))
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        format!(
            "Task Instructions:\n{}\n\nSuccess Criteria:\n{}\n\nInputs:\n{}\n\nNotes:\n{}",
            self.description,
            self.success_criteria.as_deref().unwrap_or("None"),
            inputs,
            self.notes.as_deref().unwrap_or("None"),
        )
    }
}

/// Performs one task. Decides on its own whether to use `search`.
#[async_trait]
pub trait TaskSolver: Send + Sync {
    async fn solve(
        &self,
        request: &SolveRequest,
        search: Option<&dyn SearchTool>,
    ) -> CapabilityResult<String>;
}

/// One web search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[async_trait]
pub trait SearchTool: Send + Sync {
    async fn search(&self, query: &str) -> CapabilityResult<Vec<SearchHit>>;
}

/// Format hits as a numbered list for inclusion in a prompt.
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results.".to_string();
    }
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("{}. {}\n   {}\n   {}", i + 1, hit.title, hit.url, hit.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Merges task results into one answer to the query.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        query: &str,
        results: &BTreeMap<TaskId, String>,
    ) -> CapabilityResult<String>;
}

/// The set of capability implementations injected into an executor.
#[derive(Clone)]
pub struct Capabilities {
    pub planner: Arc<dyn Planner>,
    pub solver: Arc<dyn TaskSolver>,
    pub search: Option<Arc<dyn SearchTool>>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("search", &self.search.is_some())
            .finish_non_exhaustive()
    }
}
