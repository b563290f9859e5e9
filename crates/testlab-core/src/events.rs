//! Events emitted while a test case view is driven.
//!
//! Observers (the CLI renderer, tests) receive these over a channel; they
//! never mutate execution state.

use serde::{Deserialize, Serialize};

use crate::types::{CaseStatus, StepStatus};

/// Event type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    RunStarted,
    StepStatusChanged,
    StepAdvanced,
    RunCompleted,
    RunHalted,
    PollFailed,
    ReorderApplied,
    ReorderFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "RUN_STARTED",
            Self::StepStatusChanged => "STEP_STATUS_CHANGED",
            Self::StepAdvanced => "STEP_ADVANCED",
            Self::RunCompleted => "RUN_COMPLETED",
            Self::RunHalted => "RUN_HALTED",
            Self::PollFailed => "POLL_FAILED",
            Self::ReorderApplied => "REORDER_APPLIED",
            Self::ReorderFailed => "REORDER_FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsoleEvent {
    RunStarted {
        test_case_id: String,
        step_id: String,
        total: usize,
    },
    StepStatusChanged {
        step_id: String,
        status: StepStatus,
    },
    StepAdvanced {
        finished: String,
        status: StepStatus,
        next: String,
        /// 0-based index of the step now executing.
        index: usize,
        total: usize,
        completed: usize,
        percent: u8,
    },
    RunCompleted {
        test_case_id: String,
        status: CaseStatus,
        completed: usize,
        total: usize,
    },
    RunHalted {
        reason: String,
    },
    PollFailed {
        step_id: String,
        error: String,
    },
    ReorderApplied {
        step_ids: Vec<String>,
    },
    ReorderFailed {
        applied: usize,
        total: usize,
        error: String,
    },
}

impl ConsoleEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::RunStarted { .. } => EventType::RunStarted,
            Self::StepStatusChanged { .. } => EventType::StepStatusChanged,
            Self::StepAdvanced { .. } => EventType::StepAdvanced,
            Self::RunCompleted { .. } => EventType::RunCompleted,
            Self::RunHalted { .. } => EventType::RunHalted,
            Self::PollFailed { .. } => EventType::PollFailed,
            Self::ReorderApplied { .. } => EventType::ReorderApplied,
            Self::ReorderFailed { .. } => EventType::ReorderFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = ConsoleEvent::StepStatusChanged {
            step_id: "s1".to_string(),
            status: StepStatus::Executing,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "STEP_STATUS_CHANGED");
        assert_eq!(json["status"], "Executing");
        assert_eq!(json["type"], event.event_type().as_str());
    }
}
