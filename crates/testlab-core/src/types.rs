//! Core types for the test-management console.
//!
//! Wire field names follow the TestLab REST API (camelCase JSON). Status
//! strings are mapped to tagged variants at this boundary so the rest of the
//! workspace never compares raw strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A step status string outside the known vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown step status: {0:?}")]
pub struct UnknownStatus(pub String);

/// Addresses one test case: every step-level request is scoped by
/// project, module, and test case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestCaseScope {
    pub project_id: String,
    pub module_id: String,
    /// Identifier of the test case within the module.
    pub test_case_id: String,
}

impl TestCaseScope {
    pub fn new(
        project_id: impl Into<String>,
        module_id: impl Into<String>,
        test_case_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            module_id: module_id.into(),
            test_case_id: test_case_id.into(),
        }
    }
}

impl fmt::Display for TestCaseScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.project_id, self.module_id, self.test_case_id
        )
    }
}

// --- Enumerations ---

/// Status of a single test step.
///
/// The server speaks two vocabularies: the legacy `Passed` and the newer
/// `Success`. Both map to [`StepStatus::Success`]; serialization always emits
/// the newer string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StepStatus {
    /// No result yet. Also the value for a missing or empty wire status.
    #[default]
    NotRun,
    /// The server is running the step.
    Executing,
    Success,
    Failed,
    /// Could not run. Terminal, so the run moves on.
    Blocked,
}

impl StepStatus {
    /// Wire string. `Success` is always emitted for a passed step.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRun => "Not Run",
            Self::Executing => "Executing",
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Blocked => "Blocked",
        }
    }

    /// Terminal statuses end polling for a step.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Blocked)
    }

    /// Statuses counted towards run progress.
    pub fn counts_as_completed(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl FromStr for StepStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Not Run" | "NotRun" | "NOT_RUN" => Ok(Self::NotRun),
            "Executing" | "EXECUTING" => Ok(Self::Executing),
            "Success" | "Passed" | "SUCCESS" | "PASSED" => Ok(Self::Success),
            "Failed" | "FAILED" => Ok(Self::Failed),
            "Blocked" | "BLOCKED" => Ok(Self::Blocked),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StepStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StepStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Aggregate status of a test case.
///
/// Unrecognized server strings are preserved in `Other` so a fetched test case
/// round-trips without losing data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CaseStatus {
    #[default]
    NotRun,
    /// A run is underway.
    InProgress,
    Passed,
    Failed,
    Blocked,
    Other(String),
}

impl CaseStatus {
    /// Wire string. `Other` values come back verbatim.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotRun => "Not Run",
            Self::InProgress => "In Progress",
            Self::Passed => "Passed",
            Self::Failed => "Failed",
            Self::Blocked => "Blocked",
            Self::Other(s) => s,
        }
    }

    /// Map a server string, never failing.
    ///
    /// Empty reads as [`CaseStatus::NotRun`], and `Success` or `Executing`
    /// fold into the aggregate vocabulary. Anything else is kept in `Other`.
    pub fn from_wire(s: &str) -> Self {
        match s.trim() {
            "" | "Not Run" | "NotRun" => Self::NotRun,
            "In Progress" | "InProgress" | "Executing" => Self::InProgress,
            "Passed" | "Success" => Self::Passed,
            "Failed" => Self::Failed,
            "Blocked" => Self::Blocked,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether a run produced this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Blocked)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CaseStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CaseStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map_or(Self::NotRun, |s| Self::from_wire(&s)))
    }
}

// --- Entities ---

/// One atomic action or assertion within a test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    /// Server-assigned identifier. Older payloads call it `testStepId`.
    #[serde(alias = "testStepId")]
    pub step_id: String,
    /// Back-reference to the owning test case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case_id: Option<String>,
    /// What the step does or checks.
    #[serde(default)]
    pub description: String,
    /// Input for the step, shown as "Test Data" in results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_data: Option<String>,
    /// Last known status. Absent or empty on the wire means not run.
    #[serde(
        default,
        deserialize_with = "deserialize_optional_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub step_status: Option<StepStatus>,
    /// Legacy steps carry an expected result instead of test data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<String>,
    /// 1-based position, string-encoded on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    /// Server timestamp, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl TestStep {
    pub fn new(step_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            test_case_id: None,
            description: description.into(),
            step_data: None,
            step_status: None,
            expected_result: None,
            order: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Set the 1-based position.
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = Some(order.to_string());
        self
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.step_status = Some(status);
        self
    }

    pub fn with_step_data(mut self, data: impl Into<String>) -> Self {
        self.step_data = Some(data.into());
        self
    }

    /// Parsed sequence position, if the order string is a positive integer.
    pub fn position(&self) -> Option<u32> {
        self.order
            .as_deref()
            .and_then(|o| o.trim().parse::<u32>().ok())
            .filter(|p| *p > 0)
    }

    /// Status with a missing value read as [`StepStatus::NotRun`].
    pub fn status(&self) -> StepStatus {
        self.step_status.unwrap_or_default()
    }
}

/// A named verification scenario with ordered steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub test_case_id: String,
    /// Display name, also used for the local export filename.
    #[serde(default)]
    pub test_case_name: String,
    /// Aggregate of the step results. A null on the wire reads as not run.
    #[serde(default)]
    pub test_case_status: CaseStatus,
    #[serde(default)]
    pub description: String,
    /// Conditions that must hold before the first step.
    #[serde(default)]
    pub precondition: String,
    #[serde(default)]
    pub expected_result: String,
    /// Free-form priority label as the server stores it.
    #[serde(default)]
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Step count reported by module listings, which omit the steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_of_test_steps: Option<String>,
    /// Steps in execution order once [`TestCase::sort_steps`] has run. Null
    /// on the wire reads as empty.
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub test_steps: Vec<TestStep>,
    /// When a step last finished in this console.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_date_time: Option<DateTime<Utc>>,
}

impl TestCase {
    /// A case with no steps, not yet run.
    pub fn new(test_case_id: impl Into<String>, test_case_name: impl Into<String>) -> Self {
        Self {
            test_case_id: test_case_id.into(),
            test_case_name: test_case_name.into(),
            test_case_status: CaseStatus::NotRun,
            description: String::new(),
            precondition: String::new(),
            expected_result: String::new(),
            priority: String::new(),
            created_at: None,
            updated_at: None,
            no_of_test_steps: None,
            test_steps: Vec::new(),
            execution_date_time: None,
        }
    }

    /// Replace the steps and keep `no_of_test_steps` in line.
    pub fn with_steps(mut self, steps: Vec<TestStep>) -> Self {
        self.test_steps = steps;
        self.no_of_test_steps = Some(self.test_steps.len().to_string());
        self
    }

    /// Sort steps by their numeric position.
    ///
    /// Steps without a parseable position keep their relative order after the
    /// positioned ones (the sort is stable).
    pub fn sort_steps(&mut self) {
        self.test_steps
            .sort_by_key(|step| step.position().unwrap_or(u32::MAX));
    }

    /// Index of `step_id` in the current step list.
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.test_steps.iter().position(|s| s.step_id == step_id)
    }

    /// Mutable step lookup by identifier.
    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut TestStep> {
        self.test_steps.iter_mut().find(|s| s.step_id == step_id)
    }

    /// Step identifiers in list order.
    pub fn step_ids(&self) -> Vec<String> {
        self.test_steps.iter().map(|s| s.step_id.clone()).collect()
    }
}

/// A module and the test cases it groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDetails {
    #[serde(default)]
    pub module_id: String,
    #[serde(default)]
    pub module_name: String,
    /// Test case summaries. Their `test_steps` are usually empty.
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub test_cases: Vec<TestCase>,
}

fn deserialize_optional_status<'de, D>(deserializer: D) -> Result<Option<StepStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn deserialize_null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_status_accepts_both_vocabularies() {
        assert_eq!("Success".parse::<StepStatus>().unwrap(), StepStatus::Success);
        assert_eq!("Passed".parse::<StepStatus>().unwrap(), StepStatus::Success);
        assert_eq!("Not Run".parse::<StepStatus>().unwrap(), StepStatus::NotRun);
        assert!("Exploded".parse::<StepStatus>().is_err());
    }

    #[test]
    fn step_status_serializes_newer_vocabulary() {
        let json = serde_json::to_string(&StepStatus::Success).unwrap();
        assert_eq!(json, "\"Success\"");
        let json = serde_json::to_string(&StepStatus::NotRun).unwrap();
        assert_eq!(json, "\"Not Run\"");
    }

    #[test]
    fn terminal_statuses() {
        assert!(StepStatus::Success.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Blocked.is_terminal());
        assert!(!StepStatus::Executing.is_terminal());
        assert!(!StepStatus::NotRun.is_terminal());
        assert!(!StepStatus::Blocked.counts_as_completed());
    }

    #[test]
    fn test_case_deserializes_null_steps_as_empty() {
        let json = r#"{"testCaseId":"tc-1","testCaseName":"Login","testCaseStatus":"Not Run","testSteps":null}"#;
        let tc: TestCase = serde_json::from_str(json).unwrap();
        assert!(tc.test_steps.is_empty());
        assert_eq!(tc.test_case_status, CaseStatus::NotRun);
    }

    #[test]
    fn test_step_accepts_legacy_id_and_empty_status() {
        let json = r#"{"testStepId":"s-9","description":"Open page","stepStatus":"","order":"2"}"#;
        let step: TestStep = serde_json::from_str(json).unwrap();
        assert_eq!(step.step_id, "s-9");
        assert_eq!(step.step_status, None);
        assert_eq!(step.position(), Some(2));
    }

    #[test]
    fn unknown_step_status_is_rejected() {
        let json = r#"{"stepId":"s-1","description":"x","stepStatus":"Exploded"}"#;
        assert!(serde_json::from_str::<TestStep>(json).is_err());
    }

    #[test]
    fn case_status_preserves_unknown_strings() {
        let status: CaseStatus = serde_json::from_str("\"Draft\"").unwrap();
        assert_eq!(status, CaseStatus::Other("Draft".to_string()));
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"Draft\"");
    }

    #[test]
    fn sort_steps_orders_numerically_and_keeps_unpositioned_last() {
        let mut tc = TestCase::new("tc", "case").with_steps(vec![
            TestStep::new("c", "third").with_order(10),
            TestStep::new("x", "no order"),
            TestStep::new("a", "first").with_order(1),
            TestStep::new("b", "second").with_order(2),
        ]);
        tc.sort_steps();
        assert_eq!(tc.step_ids(), vec!["a", "b", "c", "x"]);
    }

    #[test]
    fn position_rejects_zero_and_garbage() {
        let mut step = TestStep::new("s", "d");
        step.order = Some("0".to_string());
        assert_eq!(step.position(), None);
        step.order = Some("abc".to_string());
        assert_eq!(step.position(), None);
    }
}
