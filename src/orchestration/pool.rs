//! Worker pool for bounded concurrent execution.
//!
//! The `WorkerPool` owns the in-flight worker invocations, enforces the
//! concurrency limit and hands completions back to the scheduler one at a
//! time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::task::{DependencyResults, Outcome, Task, TaskId};
use crate::error::{Error, Result};
use crate::orchestration::worker::{Worker, CANCELLED_MESSAGE};

/// Manages up to `max_concurrent` running workers.
///
/// Every worker gets a child of the pool's cancellation token, so
/// cancelling the pool signals all of them at once.
///
/// # Example
///
/// ```ignore
/// let mut pool = WorkerPool::new(Arc::new(worker), 3, CancellationToken::new());
/// assert!(pool.has_capacity());
/// pool.spawn(task, deps)?;
/// let (task_id, outcome) = pool.next_completion().await.unwrap()?;
/// ```
pub struct WorkerPool {
    worker: Arc<Worker>,
    in_flight: JoinSet<(TaskId, Outcome)>,
    active: BTreeSet<TaskId>,
    max_concurrent: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create a new pool with the given capacity.
    pub fn new(worker: Arc<Worker>, max_concurrent: usize, cancel: CancellationToken) -> Self {
        Self {
            worker,
            in_flight: JoinSet::new(),
            active: BTreeSet::new(),
            max_concurrent,
            cancel,
        }
    }

    /// Start a worker for `task`.
    ///
    /// # Errors
    /// `WorkerPoolFull` if the pool is at capacity.
    pub fn spawn(&mut self, task: Task, dependency_results: DependencyResults) -> Result<()> {
        if !self.has_capacity() {
            return Err(Error::WorkerPoolFull {
                max: self.max_concurrent,
            });
        }

        let worker = Arc::clone(&self.worker);
        let token = self.cancel.child_token();
        let task_id = task.id.clone();
        self.in_flight.spawn(async move {
            let outcome = worker.run(&task, dependency_results, &token).await;
            (task.id, outcome)
        });
        debug!(task_id = %task_id, active = self.active.len() + 1, "worker spawned");
        self.active.insert(task_id);
        Ok(())
    }

    /// Wait for the next worker to finish.
    ///
    /// Returns `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<Result<(TaskId, Outcome)>> {
        let joined = self.in_flight.join_next().await?;
        Some(match joined {
            Ok((task_id, outcome)) => {
                self.active.remove(&task_id);
                Ok((task_id, outcome))
            }
            Err(e) => Err(Error::TaskJoin(e.to_string())),
        })
    }

    /// Cancel every in-flight worker and wait for them to stop.
    ///
    /// Returns one outcome per task that was still in the pool, ascending by
    /// id. Workers that had already finished keep their real outcome; every
    /// other task gets a failure carrying [`CANCELLED_MESSAGE`].
    pub async fn shutdown(&mut self) -> Vec<(TaskId, Outcome)> {
        let mut finished = BTreeMap::new();
        while let Some(joined) = self.in_flight.try_join_next() {
            if let Ok((task_id, outcome)) = joined {
                finished.insert(task_id, outcome);
            }
        }

        self.cancel.cancel();
        self.in_flight.abort_all();
        while let Some(joined) = self.in_flight.join_next().await {
            if let Ok((task_id, outcome)) = joined {
                finished.insert(task_id, outcome);
            }
        }

        std::mem::take(&mut self.active)
            .into_iter()
            .map(|task_id| {
                let outcome = finished
                    .remove(&task_id)
                    .unwrap_or_else(|| Outcome::failure(CANCELLED_MESSAGE));
                (task_id, outcome)
            })
            .collect()
    }

    /// Ids of tasks currently running, ascending.
    pub fn active_ids(&self) -> impl Iterator<Item = &TaskId> + '_ {
        self.active.iter()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Free worker slots.
    pub fn available(&self) -> usize {
        self.max_concurrent.saturating_sub(self.active_count())
    }

    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.max_concurrent
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("active", &self.active)
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}
