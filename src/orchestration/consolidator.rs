//! Consolidator: merges completed task results into the final answer.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::core::task::TaskId;
use crate::error::{Error, Result};
use crate::orchestration::capability::Synthesizer;

#[derive(Clone)]
pub struct Consolidator {
    synthesizer: Arc<dyn Synthesizer>,
}

impl Consolidator {
    pub fn new(synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self { synthesizer }
    }

    /// Synthesize one answer to `query` from `results`.
    ///
    /// Results are passed in ascending task id order.
    ///
    /// # Errors
    /// `ConsolidationFailed` if the synthesizer errors or returns nothing.
    pub async fn consolidate(
        &self,
        query: &str,
        results: &BTreeMap<TaskId, String>,
    ) -> Result<String> {
        debug!(inputs = results.len(), "consolidating results");

        let answer = self
            .synthesizer
            .synthesize(query, results)
            .await
            .map_err(|e| Error::ConsolidationFailed(e.to_string()))?;

        if answer.trim().is_empty() {
            return Err(Error::ConsolidationFailed(
                "synthesizer returned an empty answer".to_string(),
            ));
        }

        info!(bytes = answer.len(), "answer synthesized");
        Ok(answer)
    }
}

impl std::fmt::Debug for Consolidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consolidator").finish_non_exhaustive()
    }
}
