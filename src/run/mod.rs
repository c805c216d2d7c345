//! Per-query run state for the executor.
//!
//! A run owns one task graph from planning until the final answer (or
//! failure) and is never shared across queries.

mod context;
mod state;
mod types;

pub use context::RunContext;
pub use state::{PhaseHistoryEntry, RunState};
pub use types::{AnswerStatus, FinalAnswer, RunId, RunPhase};
