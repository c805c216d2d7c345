//! Planner adapter: one planning call per query, validated into a graph.
//!
//! Providers that speak text use [`parse_plan`] to turn the model's JSON
//! plan document into descriptors. The adapter itself only validates.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::core::dag::TaskGraph;
use crate::core::task::{TaskDescriptor, TaskId};
use crate::error::{Error, Result};
use crate::orchestration::capability::{Plan, Planner};

/// Calls the planning capability and builds a validated [`TaskGraph`].
#[derive(Clone)]
pub struct PlannerAdapter {
    planner: Arc<dyn Planner>,
}

impl PlannerAdapter {
    pub fn new(planner: Arc<dyn Planner>) -> Self {
        Self { planner }
    }

    /// Plan `query` and build its graph.
    ///
    /// # Errors
    /// - `Capability(Planning)` if the planner fails
    /// - `EmptyPlan` if it returns no tasks
    /// - `MalformedGraph` if the tasks do not form a valid DAG
    pub async fn build(&self, query: &str) -> Result<(TaskGraph, Option<String>)> {
        let plan = self.planner.plan(query).await?;
        info!(tasks = plan.tasks.len(), "planner returned plan");

        if plan.tasks.is_empty() {
            return Err(Error::EmptyPlan);
        }
        for task in &plan.tasks {
            debug!(
                task_id = %task.id,
                dependencies = task.dependencies.len(),
                "planned task"
            );
        }

        let graph = TaskGraph::construct(plan.tasks)?;
        Ok((graph, plan.goal))
    }
}

impl std::fmt::Debug for PlannerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannerAdapter").finish_non_exhaustive()
    }
}

/// Plan document as produced by the planning model.
#[derive(Debug, Deserialize)]
struct PlanDocument {
    #[serde(default)]
    goal: Option<String>,
    #[serde(default, alias = "tasks")]
    plan: Vec<PlannedTask>,
}

#[derive(Debug, Deserialize)]
struct PlannedTask {
    id: String,
    #[serde(alias = "description")]
    instructions: String,
    #[serde(default)]
    success_criteria: Option<String>,
    #[serde(default, alias = "dependencies")]
    inputs: Vec<String>,
    #[serde(default)]
    notes: Option<String>,
}

impl From<PlannedTask> for TaskDescriptor {
    fn from(task: PlannedTask) -> Self {
        TaskDescriptor {
            id: TaskId::from(task.id),
            description: task.instructions,
            dependencies: task.inputs.into_iter().map(TaskId::from).collect(),
            success_criteria: task.success_criteria.filter(|s| !s.trim().is_empty()),
            notes: task.notes.filter(|s| !s.trim().is_empty()),
        }
    }
}

/// Parse a plan document out of model output.
///
/// Accepts bare JSON, JSON in a code fence, or JSON surrounded by prose.
///
/// # Errors
/// `MalformedGraph` when no JSON object can be found or it does not match
/// the plan document shape.
pub fn parse_plan(text: &str) -> Result<Plan> {
    let json = extract_json_object(text)
        .ok_or_else(|| Error::MalformedGraph("plan output contains no JSON object".to_string()))?;
    let doc: PlanDocument = serde_json::from_str(json)
        .map_err(|e| Error::MalformedGraph(format!("plan output is not a valid plan: {}", e)))?;

    Ok(Plan {
        goal: doc.goal.filter(|g| !g.trim().is_empty()),
        tasks: doc.plan.into_iter().map(TaskDescriptor::from).collect(),
    })
}

/// Slice from the first `{` to the last `}`.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}
