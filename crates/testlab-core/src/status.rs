//! Aggregate status derivation for a test case.
//!
//! Precedence: Failed > Blocked > Passed. A case whose steps are not all in a
//! passed state and carry no failure or block keeps its prior status.

use crate::types::{CaseStatus, StepStatus};

/// Derive the overall status of a test case from its step statuses.
pub fn aggregate_status<I>(statuses: I, prior: &CaseStatus) -> CaseStatus
where
    I: IntoIterator<Item = StepStatus>,
{
    let mut any_failed = false;
    let mut any_blocked = false;
    let mut all_passed = true;
    let mut count = 0usize;

    for status in statuses {
        count += 1;
        match status {
            StepStatus::Failed => any_failed = true,
            StepStatus::Blocked => any_blocked = true,
            StepStatus::Success => {}
            StepStatus::NotRun | StepStatus::Executing => all_passed = false,
        }
        if matches!(status, StepStatus::Failed | StepStatus::Blocked) {
            all_passed = false;
        }
    }

    if any_failed {
        CaseStatus::Failed
    } else if any_blocked {
        CaseStatus::Blocked
    } else if count > 0 && all_passed {
        CaseStatus::Passed
    } else {
        prior.clone()
    }
}
