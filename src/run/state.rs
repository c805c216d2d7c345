//! Run state management with phase transition validation.
//!
//! `RunState` enforces the executor's phase ordering:
//!
//! Planning -> Scheduling -> Consolidating -> Done
//!
//! Any non-terminal phase may move to Failed. Done and Failed are final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::RunPhase;

/// A record of a phase transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    /// The phase that was entered.
    pub phase: RunPhase,
    /// When this phase was entered.
    pub entered_at: DateTime<Utc>,
}

/// Tracks the current phase of a run and every phase it visited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    phase: RunPhase,
    phase_history: Vec<PhaseHistoryEntry>,
}

impl RunState {
    /// Start a run in `Planning`.
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Planning,
            phase_history: vec![PhaseHistoryEntry {
                phase: RunPhase::Planning,
                entered_at: Utc::now(),
            }],
        }
    }

    /// Check if a transition to the target phase is valid from the current phase.
    pub fn can_transition(&self, target: RunPhase) -> bool {
        matches!(
            (self.phase, target),
            (RunPhase::Planning, RunPhase::Scheduling)
                | (RunPhase::Scheduling, RunPhase::Consolidating)
                | (RunPhase::Consolidating, RunPhase::Done)
                | (RunPhase::Planning, RunPhase::Failed)
                | (RunPhase::Scheduling, RunPhase::Failed)
                | (RunPhase::Consolidating, RunPhase::Failed)
        )
    }

    /// Move to `target`, or fail with `InvalidPhaseTransition`.
    pub fn transition(&mut self, target: RunPhase) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }

        self.phase = target;
        self.phase_history.push(PhaseHistoryEntry {
            phase: target,
            entered_at: Utc::now(),
        });

        Ok(())
    }

    pub fn current_phase(&self) -> RunPhase {
        self.phase
    }

    pub fn phase_history(&self) -> &[PhaseHistoryEntry] {
        &self.phase_history
    }

    /// Last non-terminal phase entered; where a failed run stopped.
    pub fn last_active_phase(&self) -> RunPhase {
        self.phase_history
            .iter()
            .rev()
            .map(|entry| entry.phase)
            .find(|phase| !phase.is_terminal())
            .unwrap_or(RunPhase::Planning)
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
