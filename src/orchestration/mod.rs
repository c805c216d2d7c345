//! Orchestration layer for planex.
//!
//! Planner adapter, scheduler, worker pool, consolidator and the executor
//! that ties them together, plus the `claude` CLI and Serper search
//! providers for the capability traits.

mod capability;
mod claude;
mod consolidator;
mod executor;
mod planner;
mod pool;
mod scheduler;
mod search;
mod worker;

pub use capability::{
    format_hits, Capabilities, CapabilityResult, Plan, Planner, SearchHit, SearchTool,
    SolveRequest, Synthesizer, TaskSolver,
};
pub use claude::{
    ClaudeBackend, ClaudeHeadless, ClaudeResponse, ResultType, DEFAULT_MAX_SEARCH_ROUNDS,
    DEFAULT_TIMEOUT_SECS,
};
pub use consolidator::Consolidator;
pub use executor::{Executor, ExecutorConfig, FailurePolicy};
pub use planner::{parse_plan, PlannerAdapter};
pub use pool::WorkerPool;
pub use scheduler::{Scheduler, SchedulerEvent, SchedulerReport};
pub use search::{SerperSearch, DEFAULT_API_KEY_ENV, DEFAULT_ENDPOINT};
pub use worker::{Worker, CANCELLED_MESSAGE};
