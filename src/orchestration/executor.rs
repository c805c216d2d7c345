//! Executor: owns one query run end to end.
//!
//! Drives a [`RunContext`] through `Planning -> Scheduling -> Consolidating
//! -> Done`, or to `Failed` from whichever phase hit a fatal error. Every
//! failure that leaves the executor is a [`RunError`] carrying the phase
//! and the last known task graph.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::dag::TaskGraph;
use crate::core::task::{TaskId, TaskStatus};
use crate::error::{Error, Result, RunError};
use crate::orchestration::capability::Capabilities;
use crate::orchestration::consolidator::Consolidator;
use crate::orchestration::planner::PlannerAdapter;
use crate::orchestration::scheduler::{Scheduler, SchedulerEvent, SchedulerReport};
use crate::orchestration::worker::Worker;
use crate::run::{AnswerStatus, FinalAnswer, RunContext};

/// What to do when the scheduler finishes with failed tasks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Consolidate whatever finished and mark the answer partial.
    #[default]
    BestEffort,
    /// Fail the run if any task failed.
    RequireAll,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::BestEffort => write!(f, "best_effort"),
            FailurePolicy::RequireAll => write!(f, "require_all"),
        }
    }
}

/// Injected executor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub max_workers: usize,
    pub failure_policy: FailurePolicy,
    /// Per-task solver deadline.
    pub task_timeout: Option<Duration>,
    /// Whole-run deadline, enforced by cancelling the run.
    pub run_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            failure_policy: FailurePolicy::default(),
            task_timeout: None,
            run_timeout: None,
        }
    }
}

pub struct Executor {
    capabilities: Capabilities,
    config: ExecutorConfig,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl Executor {
    pub fn new(capabilities: Capabilities, config: ExecutorConfig) -> Self {
        Self {
            capabilities,
            config,
            event_tx: None,
        }
    }

    /// Forward scheduler events of every run to `event_tx`.
    pub fn with_events(mut self, event_tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `query` with the configured worker bound.
    pub async fn run(&self, query: &str) -> std::result::Result<FinalAnswer, RunError> {
        self.run_query(query, self.config.max_workers).await
    }

    pub async fn run_query(
        &self,
        query: &str,
        max_workers: usize,
    ) -> std::result::Result<FinalAnswer, RunError> {
        self.run_query_with_cancel(query, max_workers, CancellationToken::new())
            .await
    }

    /// Run `query`, stopping early when `cancel` fires.
    ///
    /// Tasks still running at cancellation are marked failed and the run
    /// ends in `Failed` with a `Cancelled` error, or `Timeout` when the
    /// configured run deadline fired.
    pub async fn run_query_with_cancel(
        &self,
        query: &str,
        max_workers: usize,
        cancel: CancellationToken,
    ) -> std::result::Result<FinalAnswer, RunError> {
        let mut ctx = RunContext::new(query);
        let cancel = cancel.child_token();
        let started = Instant::now();
        let deadline = self.config.run_timeout.map(|limit| {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                token.cancel();
            })
        });

        info!(run_id = %ctx.id(), max_workers, "run started");
        let result = self.drive(&mut ctx, max_workers, &cancel).await;
        if let Some(handle) = deadline {
            handle.abort();
        }

        match result {
            Ok(answer) => {
                info!(
                    run_id = %ctx.id(),
                    status = ?answer.status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "run finished"
                );
                Ok(answer)
            }
            Err(e) => {
                let e = match (e, self.config.run_timeout) {
                    (Error::Cancelled(_), Some(limit)) if started.elapsed() >= limit => {
                        Error::Timeout(limit)
                    }
                    (e, _) => e,
                };
                let run_error = ctx.fail(e);
                error!(
                    run_id = %run_error.run_id,
                    phase = %run_error.phase,
                    error = %run_error.source,
                    "run failed"
                );
                Err(run_error)
            }
        }
    }

    /// Plan `query` without executing it.
    pub async fn plan_only(&self, query: &str) -> Result<(TaskGraph, Option<String>)> {
        PlannerAdapter::new(Arc::clone(&self.capabilities.planner))
            .build(query)
            .await
    }

    async fn drive(
        &self,
        ctx: &mut RunContext,
        max_workers: usize,
        cancel: &CancellationToken,
    ) -> Result<FinalAnswer> {
        let query = ctx.query().to_string();

        // Planning
        let adapter = PlannerAdapter::new(Arc::clone(&self.capabilities.planner));
        let planned = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = adapter.build(&query) => Some(res),
        };
        let (graph, goal) =
            planned.ok_or_else(|| Error::Cancelled("cancelled during planning".to_string()))??;
        ctx.begin_scheduling(graph, goal)?;
        info!(run_id = %ctx.id(), phase = %ctx.phase(), "phase entered");

        // Scheduling
        let worker = Worker::new(
            Arc::clone(&self.capabilities.solver),
            self.capabilities.search.clone(),
        )
        .with_timeout(self.config.task_timeout);
        let mut scheduler =
            Scheduler::new(Arc::new(worker), max_workers).with_cancellation(cancel.clone());
        if let Some(tx) = &self.event_tx {
            scheduler = scheduler.with_events(tx.clone());
        }
        let graph = ctx
            .graph_mut()
            .ok_or_else(|| Error::Validation("run has no task graph".to_string()))?;
        let report = scheduler.run(graph).await?;
        let all_failed = graph.count(TaskStatus::Failed) == graph.len();

        let (results, failed, blocked) = match report {
            SchedulerReport::Complete { results } => (results, BTreeSet::new(), BTreeSet::new()),
            SchedulerReport::PartialFailure {
                failed,
                blocked,
                results,
            } => {
                if all_failed {
                    return Err(Error::AllTasksFailed { failed });
                }
                if self.config.failure_policy == FailurePolicy::RequireAll {
                    return Err(Error::PartialFailure { failed });
                }
                warn!(
                    run_id = %ctx.id(),
                    failed = failed.len(),
                    blocked = blocked.len(),
                    "continuing with partial results"
                );
                (results, failed, blocked)
            }
        };

        // Consolidating
        ctx.begin_consolidating()?;
        info!(run_id = %ctx.id(), phase = %ctx.phase(), inputs = results.len(), "phase entered");
        let consolidator = Consolidator::new(Arc::clone(&self.capabilities.synthesizer));
        let consolidated = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = consolidator.consolidate(&query, &results) => Some(res),
        };
        let answer = consolidated
            .ok_or_else(|| Error::Cancelled("cancelled during consolidation".to_string()))??;

        let (status, caveat) = if failed.is_empty() {
            (AnswerStatus::Success, None)
        } else {
            (AnswerStatus::Partial, Some(partial_caveat(&failed, &blocked)))
        };
        ctx.complete(FinalAnswer {
            status,
            answer,
            caveat,
            failed_tasks: failed,
            task_results: results,
        })
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("capabilities", &self.capabilities)
            .field("config", &self.config)
            .finish()
    }
}

fn partial_caveat(failed: &BTreeSet<TaskId>, blocked: &BTreeSet<TaskId>) -> String {
    let list = |ids: &BTreeSet<TaskId>| {
        ids.iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut caveat = format!("Partial answer: failed tasks: {}", list(failed));
    if !blocked.is_empty() {
        caveat.push_str(&format!("; skipped tasks: {}", list(blocked)));
    }
    caveat.push('.');
    caveat
}
