//! Output rendering for testlabctl.
//!
//! Formats test cases, run progress, and export results for the terminal.

use std::path::Path;

use testlab_console::{ExportOutcome, ReorderReport};
use testlab_core::{CaseStatus, Config, ConsoleEvent, Progress, StepStatus, TestCase, TestStep};

/// Print a test case header and its step table.
pub fn print_case(test_case: &TestCase) {
    println!("Test case: {}", test_case.test_case_id);
    println!();
    println!("  Name:       {}", test_case.test_case_name);
    println!("  Status:     {}", format_case_status(&test_case.test_case_status));
    if !test_case.priority.is_empty() {
        println!("  Priority:   {}", test_case.priority);
    }
    if let Some(executed) = &test_case.execution_date_time {
        println!("  Executed:   {}", format_time(executed));
    }

    println!();
    print_steps(&test_case.test_steps);
}

pub fn print_steps(steps: &[TestStep]) {
    if steps.is_empty() {
        println!("  No steps.");
        return;
    }

    println!(
        "  {:<4}  {:<24}  {:<10}  {:<32}  {:<20}",
        "#", "STEP ID", "STATUS", "DESCRIPTION", "TEST DATA"
    );
    println!("  {}", "-".repeat(98));

    for (i, step) in steps.iter().enumerate() {
        println!(
            "  {:<4}  {:<24}  {:<10}  {:<32}  {:<20}",
            i + 1,
            truncate(&step.step_id, 24),
            format_step_status(step.status()),
            truncate(&step.description, 32),
            truncate(step.step_data.as_deref().unwrap_or("-"), 20),
        );
    }
}

/// Print the test cases of a module in tabular format.
pub fn print_case_list(cases: &[TestCase]) {
    if cases.is_empty() {
        println!("No test cases found.");
        return;
    }

    println!("{:<24}  {:<32}  {:<12}  {:<6}", "ID", "NAME", "STATUS", "STEPS");
    println!("{}", "-".repeat(80));

    for case in cases {
        let steps = case
            .no_of_test_steps
            .clone()
            .unwrap_or_else(|| case.test_steps.len().to_string());
        println!(
            "{:<24}  {:<32}  {:<12}  {:<6}",
            truncate(&case.test_case_id, 24),
            truncate(&case.test_case_name, 32),
            format_case_status(&case.test_case_status),
            steps,
        );
    }

    println!();
    println!("{} test case(s)", cases.len());
}

/// One line per console event.
pub fn format_event(event: &ConsoleEvent) -> String {
    match event {
        ConsoleEvent::RunStarted { step_id, total, .. } => {
            format!("Executing step 1 of {total} ({step_id})")
        }
        ConsoleEvent::StepStatusChanged { step_id, status } => {
            format!("  {step_id}: {}", format_step_status(*status))
        }
        ConsoleEvent::StepAdvanced {
            finished,
            status,
            next,
            index,
            total,
            completed,
            percent,
        } => format!(
            "  {finished}: {}  {completed}/{total} steps ({percent}%)\nExecuting step {} of {total} ({next})",
            format_step_status(*status),
            index + 1,
        ),
        ConsoleEvent::RunCompleted {
            status,
            completed,
            total,
            ..
        } => format!(
            "Run finished: {} ({completed}/{total} steps)",
            format_case_status(status)
        ),
        ConsoleEvent::RunHalted { reason } => format!("Run halted: {reason}"),
        ConsoleEvent::PollFailed { step_id, error } => {
            format!("  {step_id}: status check failed, retrying ({error})")
        }
        ConsoleEvent::ReorderApplied { step_ids } => {
            format!("Order saved: {}", step_ids.join(", "))
        }
        ConsoleEvent::ReorderFailed {
            applied,
            total,
            error,
        } => format!("Reorder failed after {applied} of {total} updates: {error}"),
    }
}

pub fn print_event(event: &ConsoleEvent) {
    println!("{}", format_event(event));
}

pub fn print_run_summary(test_case: &TestCase, progress: Progress) {
    println!();
    println!(
        "Result: {}  {}/{} steps completed ({}%)",
        format_case_status(&test_case.test_case_status),
        progress.completed,
        progress.total,
        progress.percent,
    );
    print_steps(&test_case.test_steps);
}

pub fn print_reorder(report: &ReorderReport, test_case: &TestCase) {
    println!("Applied {} of {} order update(s).", report.applied, report.total);
    println!();
    print_steps(&test_case.test_steps);
}

pub fn print_step_created(step: &TestStep) {
    println!("Created step: {}", step.step_id);
    println!("  Description: {}", step.description);
    if let Some(data) = &step.step_data {
        println!("  Test data:   {data}");
    }
}

pub fn print_export(outcome: &ExportOutcome) {
    println!(
        "Exported results to {} ({} bytes, {})",
        outcome.path.display(),
        outcome.bytes,
        outcome.source.as_str(),
    );
}

pub fn print_config(config: &Config, path: Option<&Path>) {
    match path {
        Some(p) if p.exists() => println!("# {}", p.display()),
        Some(p) => println!("# {} (not present, defaults shown)", p.display()),
        None => println!("# no config directory, defaults shown"),
    }
    for (key, value) in config.entries() {
        println!("{key}={value}");
    }
}

fn format_step_status(status: StepStatus) -> &'static str {
    match status {
        StepStatus::NotRun => "NOT_RUN",
        StepStatus::Executing => "EXECUTING",
        StepStatus::Success => "SUCCESS",
        StepStatus::Failed => "FAILED",
        StepStatus::Blocked => "BLOCKED",
    }
}

fn format_case_status(status: &CaseStatus) -> String {
    match status {
        CaseStatus::NotRun => "NOT_RUN".to_string(),
        CaseStatus::InProgress => "IN_PROGRESS".to_string(),
        CaseStatus::Passed => "PASSED".to_string(),
        CaseStatus::Failed => "FAILED".to_string(),
        CaseStatus::Blocked => "BLOCKED".to_string(),
        CaseStatus::Other(s) => s.clone(),
    }
}

fn format_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate("ééééééé", 5), "éé...");
    }

    #[test]
    fn advanced_event_shows_progress_and_next_step() {
        let line = format_event(&ConsoleEvent::StepAdvanced {
            finished: "s1".to_string(),
            status: StepStatus::Success,
            next: "s2".to_string(),
            index: 1,
            total: 3,
            completed: 1,
            percent: 33,
        });
        assert_eq!(
            line,
            "  s1: SUCCESS  1/3 steps (33%)\nExecuting step 2 of 3 (s2)"
        );
    }

    #[test]
    fn completed_event_names_aggregate() {
        let line = format_event(&ConsoleEvent::RunCompleted {
            test_case_id: "tc-1".to_string(),
            status: CaseStatus::Failed,
            completed: 3,
            total: 3,
        });
        assert_eq!(line, "Run finished: FAILED (3/3 steps)");
    }

    #[test]
    fn unknown_case_status_is_shown_verbatim() {
        assert_eq!(format_case_status(&CaseStatus::Other("Retest".into())), "Retest");
    }
}
