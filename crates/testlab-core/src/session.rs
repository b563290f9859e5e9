//! In-memory execution state for one test case.
//!
//! The session is read by anyone but mutated only through the sequencer,
//! which keeps the polling set, result map, and current index consistent.

use std::collections::HashMap;

use crate::types::StepStatus;

/// Execution state owned by the view coordinating a single test case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSession {
    results: HashMap<String, StepStatus>,
    polling: Vec<String>,
    current_index: Option<usize>,
    executing: bool,
}

impl ExecutionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    /// Index of the step currently executing; `None` when idle.
    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// Step identifiers currently subject to polling.
    pub fn polling_ids(&self) -> &[String] {
        &self.polling
    }

    pub fn is_polling(&self, step_id: &str) -> bool {
        self.polling.iter().any(|id| id == step_id)
    }

    pub fn result(&self, step_id: &str) -> Option<StepStatus> {
        self.results.get(step_id).copied()
    }

    pub fn results(&self) -> &HashMap<String, StepStatus> {
        &self.results
    }

    pub fn has_results(&self) -> bool {
        !self.results.is_empty()
    }

    /// Number of recorded results counted as completed (Success or Failed).
    pub fn completed_count(&self) -> usize {
        self.results
            .values()
            .filter(|s| s.counts_as_completed())
            .count()
    }

    /// Record a status; returns true when it differs from the previous one.
    pub(crate) fn record(&mut self, step_id: &str, status: StepStatus) -> bool {
        self.results.insert(step_id.to_string(), status) != Some(status)
    }

    pub(crate) fn start_polling(&mut self, step_id: &str) -> bool {
        if self.is_polling(step_id) {
            return false;
        }
        self.polling.push(step_id.to_string());
        true
    }

    pub(crate) fn stop_polling(&mut self, step_id: &str) -> bool {
        let before = self.polling.len();
        self.polling.retain(|id| id != step_id);
        self.polling.len() != before
    }

    /// Empty the polling set, returning the identifiers that were in it.
    pub(crate) fn drain_polling(&mut self) -> Vec<String> {
        std::mem::take(&mut self.polling)
    }

    pub(crate) fn set_current_index(&mut self, index: Option<usize>) {
        self.current_index = index;
    }

    pub(crate) fn set_executing(&mut self, executing: bool) {
        self.executing = executing;
    }

    pub(crate) fn reset(&mut self) {
        self.results.clear();
        self.polling.clear();
        self.current_index = None;
        self.executing = false;
    }
}
