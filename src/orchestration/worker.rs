//! Worker: runs exactly one task against the solver capability.
//!
//! A worker never touches the graph. It receives a snapshot of the task and
//! its dependency results, and reports an [`Outcome`] back to the scheduler.
//! Every failure of the solver (error, panic, timeout, cancellation) is
//! turned into `Outcome::Failure` here.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::task::{DependencyResults, Outcome, Task};
use crate::orchestration::capability::{SearchTool, SolveRequest, TaskSolver};

/// Diagnostic recorded on tasks stopped by cancellation.
pub const CANCELLED_MESSAGE: &str = "cancelled before completion";

pub struct Worker {
    solver: Arc<dyn TaskSolver>,
    search: Option<Arc<dyn SearchTool>>,
    timeout: Option<Duration>,
}

impl Worker {
    pub fn new(solver: Arc<dyn TaskSolver>, search: Option<Arc<dyn SearchTool>>) -> Self {
        Self {
            solver,
            search,
            timeout: None,
        }
    }

    /// Fail any solve that takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    /// Execute `task` with the outputs of its dependencies.
    ///
    /// Never returns an error: every failure becomes `Outcome::Failure`
    /// carrying a diagnostic message.
    pub async fn run(
        &self,
        task: &Task,
        dependency_results: DependencyResults,
        cancel: &CancellationToken,
    ) -> Outcome {
        let request = SolveRequest::new(task, dependency_results);
        debug!(
            task_id = %request.task_id,
            inputs = request.context.len(),
            search = self.search.is_some(),
            "worker starting"
        );

        let solve = AssertUnwindSafe(self.solver.solve(&request, self.search.as_deref()))
            .catch_unwind();
        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, solve).await.map_err(|_| limit),
                None => Ok(solve.await),
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::failure(CANCELLED_MESSAGE),
            res = bounded => match res {
                Err(limit) => Outcome::failure(format!("solver timed out after {:?}", limit)),
                Ok(Err(panic)) => {
                    Outcome::failure(format!("solver panicked: {}", panic_message(&*panic)))
                }
                Ok(Ok(Err(e))) => Outcome::failure(e.to_string()),
                Ok(Ok(Ok(result))) if result.trim().is_empty() => {
                    Outcome::failure("solver returned an empty result")
                }
                Ok(Ok(Ok(result))) => Outcome::success(result),
            },
        };

        match &outcome {
            Outcome::Success { result } => {
                debug!(task_id = %task.id, bytes = result.len(), "worker finished")
            }
            Outcome::Failure { error } => warn!(task_id = %task.id, %error, "worker failed"),
        }
        outcome
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("search", &self.search.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
