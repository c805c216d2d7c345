//! Scheduler for parallel task execution.
//!
//! The Scheduler drives a [`TaskGraph`] from all-pending to a terminal
//! state. It promotes eligible tasks to ready, dispatches them to workers
//! up to the concurrency bound, and applies each worker outcome as it
//! arrives. It is the only writer of the graph while a run is in progress.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::dag::TaskGraph;
use crate::core::task::{Outcome, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::pool::WorkerPool;
use crate::orchestration::worker::Worker;

/// Events emitted by the scheduler for task lifecycle changes.
///
/// These let callers (the CLI progress output, tests) follow a run
/// without polling the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A task's dependencies are all done.
    TaskReady { task_id: TaskId },
    /// A task was handed to a worker.
    TaskStarted { task_id: TaskId },
    /// A task finished with a result.
    TaskCompleted { task_id: TaskId },
    /// A task finished with an error.
    TaskFailed { task_id: TaskId, error: String },
    /// Every task in the graph is done.
    AllTasksComplete,
    /// The graph is terminal with failures; `blocked` tasks never ran.
    Stalled {
        failed: BTreeSet<TaskId>,
        blocked: BTreeSet<TaskId>,
    },
}

/// How a scheduler run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerReport {
    /// Every task is done.
    Complete { results: BTreeMap<TaskId, String> },
    /// At least one task failed. `blocked` tasks depended on a failure and
    /// were never dispatched.
    PartialFailure {
        failed: BTreeSet<TaskId>,
        blocked: BTreeSet<TaskId>,
        results: BTreeMap<TaskId, String>,
    },
}

impl SchedulerReport {
    pub fn results(&self) -> &BTreeMap<TaskId, String> {
        match self {
            SchedulerReport::Complete { results } => results,
            SchedulerReport::PartialFailure { results, .. } => results,
        }
    }

    pub fn failed(&self) -> BTreeSet<TaskId> {
        match self {
            SchedulerReport::Complete { .. } => BTreeSet::new(),
            SchedulerReport::PartialFailure { failed, .. } => failed.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, SchedulerReport::Complete { .. })
    }
}

/// Drives one task graph to completion with at most `max_workers`
/// concurrent workers.
///
/// # Example
///
/// ```ignore
/// let (event_tx, mut event_rx) = mpsc::channel(100);
/// let mut scheduler = Scheduler::new(Arc::new(worker), 4).with_events(event_tx);
/// let report = scheduler.run(&mut graph).await?;
/// ```
pub struct Scheduler {
    worker: Arc<Worker>,
    max_workers: usize,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
    cancel: CancellationToken,
    /// Highest number of simultaneously running tasks observed.
    peak_running: usize,
    /// Completed loop iterations (one per applied outcome).
    iterations: usize,
}

impl Scheduler {
    pub fn new(worker: Arc<Worker>, max_workers: usize) -> Self {
        Self {
            worker,
            max_workers,
            event_tx: None,
            cancel: CancellationToken::new(),
            peak_running: 0,
            iterations: 0,
        }
    }

    /// Emit [`SchedulerEvent`]s on `event_tx`. The receiver must be drained.
    pub fn with_events(mut self, event_tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Stop the run when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn peak_running(&self) -> usize {
        self.peak_running
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Publish `event` without waiting; a slow or absent reader loses events.
    fn emit(&self, event: SchedulerEvent) {
        let Some(tx) = &self.event_tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!(?event, "event channel full, dropping event")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Mark every newly eligible task as ready.
    fn promote_ready(&self, graph: &mut TaskGraph) -> Result<()> {
        let eligible: Vec<TaskId> = graph.ready_tasks().map(|t| t.id.clone()).collect();
        for task_id in eligible {
            graph.mark_ready(&task_id)?;
            debug!(task_id = %task_id, "task ready");
            self.emit(SchedulerEvent::TaskReady { task_id });
        }
        Ok(())
    }

    /// Dispatch ready tasks into free worker slots, ascending by id.
    ///
    /// Returns the number of tasks dispatched.
    fn dispatch(&mut self, graph: &mut TaskGraph, pool: &mut WorkerPool) -> Result<usize> {
        let slots = self.max_workers.saturating_sub(graph.running_count());
        let batch: Vec<TaskId> = graph
            .tasks()
            .filter(|t| t.status() == TaskStatus::Ready)
            .take(slots)
            .map(|t| t.id.clone())
            .collect();

        let dispatched = batch.len();
        for task_id in batch {
            let dependency_results = graph.dependency_results(&task_id)?;
            graph.mark_running(&task_id)?;
            let task = graph
                .get_task(&task_id)
                .cloned()
                .ok_or_else(|| Error::TaskNotFound(task_id.clone()))?;
            pool.spawn(task, dependency_results)?;

            info!(task_id = %task_id, running = graph.running_count(), "task started");
            self.emit(SchedulerEvent::TaskStarted { task_id });
        }

        let running = graph.running_count();
        debug_assert!(running <= self.max_workers);
        self.peak_running = self.peak_running.max(running);
        Ok(dispatched)
    }

    /// Apply one worker outcome to the graph.
    fn handle_outcome(
        &mut self,
        graph: &mut TaskGraph,
        task_id: TaskId,
        outcome: Outcome,
    ) -> Result<()> {
        let event = match &outcome {
            Outcome::Success { .. } => SchedulerEvent::TaskCompleted {
                task_id: task_id.clone(),
            },
            Outcome::Failure { error } => SchedulerEvent::TaskFailed {
                task_id: task_id.clone(),
                error: error.clone(),
            },
        };
        graph.apply_outcome(&task_id, outcome)?;
        self.iterations += 1;

        match &event {
            SchedulerEvent::TaskFailed { error, .. } => {
                warn!(task_id = %task_id, %error, "task failed")
            }
            _ => info!(task_id = %task_id, "task completed"),
        }
        self.emit(event);
        Ok(())
    }

    /// Stop all workers and record what became of the tasks they held.
    ///
    /// Tasks whose worker had already finished keep that outcome; the rest
    /// are failed as cancelled.
    async fn abort(
        &mut self,
        graph: &mut TaskGraph,
        pool: &mut WorkerPool,
        reason: Error,
    ) -> Error {
        let stopped = pool.shutdown().await;
        warn!(stopped = stopped.len(), %reason, "scheduler aborting");
        for (task_id, outcome) in stopped {
            if let Err(e) = self.handle_outcome(graph, task_id, outcome) {
                return e;
            }
        }
        reason
    }

    /// Run the scheduling loop until the graph is terminal.
    ///
    /// 1. Promote eligible tasks to ready
    /// 2. Stop if the graph is terminal
    /// 3. Dispatch ready tasks into free worker slots
    /// 4. Wait for one worker to finish and apply its outcome
    ///
    /// # Errors
    /// - `Validation` if `max_workers` is zero or no task can make progress
    /// - `Cancelled` if the cancellation token fires; running tasks are
    ///   marked failed first
    /// - `InvalidTransition` / `TaskJoin` on internal invariant violations
    pub async fn run(&mut self, graph: &mut TaskGraph) -> Result<SchedulerReport> {
        if self.max_workers == 0 {
            return Err(Error::Validation("max_workers must be at least 1".to_string()));
        }

        let mut pool = WorkerPool::new(
            Arc::clone(&self.worker),
            self.max_workers,
            self.cancel.child_token(),
        );
        info!(
            tasks = graph.len(),
            max_workers = self.max_workers,
            "scheduler starting"
        );

        loop {
            self.promote_ready(graph)?;
            if graph.is_terminal() {
                break;
            }
            if self.cancel.is_cancelled() {
                let reason = Error::Cancelled("run cancelled".to_string());
                return Err(self.abort(graph, &mut pool, reason).await);
            }

            self.dispatch(graph, &mut pool)?;
            if pool.is_idle() {
                return Err(Error::Validation(
                    "scheduler stalled: no task is ready or running".to_string(),
                ));
            }

            let completion = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                next = pool.next_completion() => Some(next),
            };
            let next = match completion {
                Some(next) => next,
                None => {
                    let reason = Error::Cancelled("run cancelled".to_string());
                    return Err(self.abort(graph, &mut pool, reason).await);
                }
            };

            match next {
                Some(Ok((task_id, outcome))) => {
                    self.handle_outcome(graph, task_id, outcome)?;
                }
                Some(Err(e)) => return Err(self.abort(graph, &mut pool, e).await),
                None => {
                    return Err(Error::Validation(
                        "worker pool drained with tasks still running".to_string(),
                    ))
                }
            }
        }

        let results = graph.results();
        let failed = graph.failed_ids();
        if failed.is_empty() {
            info!(tasks = results.len(), "all tasks complete");
            self.emit(SchedulerEvent::AllTasksComplete);
            Ok(SchedulerReport::Complete { results })
        } else {
            let blocked = graph.blocked_ids();
            warn!(
                failed = failed.len(),
                blocked = blocked.len(),
                done = results.len(),
                "scheduler finished with failures"
            );
            self.emit(SchedulerEvent::Stalled {
                failed: failed.clone(),
                blocked: blocked.clone(),
            });
            Ok(SchedulerReport::PartialFailure {
                failed,
                blocked,
                results,
            })
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("max_workers", &self.max_workers)
            .field("peak_running", &self.peak_running)
            .field("iterations", &self.iterations)
            .finish()
    }
}
