//! Transient state of one query run.

use crate::core::dag::TaskGraph;
use crate::error::{Error, Result, RunError};

use super::{FinalAnswer, RunId, RunPhase, RunState};

/// Everything the executor tracks for one query.
///
/// Owned exclusively by the executor for the duration of the run. The
/// graph is attached after planning and dropped with the context.
#[derive(Debug)]
pub struct RunContext {
    id: RunId,
    query: String,
    /// Planner's restatement of the query, when it provides one.
    goal: Option<String>,
    graph: Option<TaskGraph>,
    final_answer: Option<FinalAnswer>,
    state: RunState,
}

impl RunContext {
    pub fn new(query: &str) -> Self {
        Self {
            id: RunId::new(),
            query: query.to_string(),
            goal: None,
            graph: None,
            final_answer: None,
            state: RunState::new(),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn goal(&self) -> Option<&str> {
        self.goal.as_deref()
    }

    pub fn phase(&self) -> RunPhase {
        self.state.current_phase()
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn graph(&self) -> Option<&TaskGraph> {
        self.graph.as_ref()
    }

    pub fn graph_mut(&mut self) -> Option<&mut TaskGraph> {
        self.graph.as_mut()
    }

    pub fn final_answer(&self) -> Option<&FinalAnswer> {
        self.final_answer.as_ref()
    }

    /// Attach the planned graph and move to `Scheduling`.
    pub fn begin_scheduling(&mut self, graph: TaskGraph, goal: Option<String>) -> Result<()> {
        self.state.transition(RunPhase::Scheduling)?;
        self.graph = Some(graph);
        self.goal = goal;
        Ok(())
    }

    pub fn begin_consolidating(&mut self) -> Result<()> {
        self.state.transition(RunPhase::Consolidating)
    }

    /// Record the answer and move to `Done`.
    pub fn complete(&mut self, answer: FinalAnswer) -> Result<FinalAnswer> {
        self.state.transition(RunPhase::Done)?;
        self.final_answer = Some(answer.clone());
        Ok(answer)
    }

    /// Move to `Failed` and package the error with a graph snapshot.
    pub fn fail(&mut self, source: Error) -> RunError {
        let phase = self.phase();
        if !phase.is_terminal() {
            // Always legal from a non-terminal phase.
            let _ = self.state.transition(RunPhase::Failed);
        }
        RunError {
            run_id: self.id,
            phase: if phase.is_terminal() {
                self.state.last_active_phase()
            } else {
                phase
            },
            source,
            snapshot: self.graph.as_ref().map(TaskGraph::snapshot),
        }
    }
}
