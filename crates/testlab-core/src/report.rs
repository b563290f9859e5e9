//! Tabular results encoding.
//!
//! One codec serves both export paths: the fallback generator writes with
//! [`ResultsTable::encode`] and server-produced CSV is validated with
//! [`ResultsTable::parse`], so the two cannot drift apart.
//!
//! Columns: `Step Number`, `Description`, `Test Data`, `Status`

use thiserror::Error;

use crate::session::ExecutionSession;
use crate::types::{StepStatus, TestCase};

/// CSV header row.
pub const HEADER: &str = "Step Number,Description,Test Data,Status";

const COLUMNS: usize = 4;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("line {line}: expected 4 columns, found {found}")]
    ColumnCount { line: usize, found: usize },
    #[error("line {line}: invalid step number {value:?}")]
    InvalidPosition { line: usize, value: String },
    #[error("line {line}: unterminated quoted field")]
    UnterminatedQuote { line: usize },
    #[error("failed to write results: {0}")]
    Io(#[from] std::io::Error),
}

/// A single row of step results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub position: u32,
    pub description: String,
    pub test_data: String,
    pub status: String,
}

impl ResultRow {
    pub fn new(position: u32, description: impl Into<String>) -> Self {
        Self {
            position,
            description: description.into(),
            test_data: String::new(),
            status: StepStatus::NotRun.as_str().to_string(),
        }
    }

    pub fn with_test_data(mut self, data: impl Into<String>) -> Self {
        self.test_data = data.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{}",
            self.position,
            sanitize_field(&self.description),
            sanitize_field(&self.test_data),
            sanitize_field(&self.status),
        )
    }
}

/// Replace characters that would break a row: separators become `;`, line
/// breaks become spaces.
pub fn sanitize_field(value: &str) -> String {
    value.replace(',', ";").replace(['\n', '\r'], " ")
}

/// Ordered result rows for one test case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultsTable {
    pub rows: Vec<ResultRow>,
}

impl ResultsTable {
    /// Build rows from the step list, preferring the session's recorded
    /// result over the step's own status.
    pub fn from_case(test_case: &TestCase, session: &ExecutionSession) -> Self {
        let rows = test_case
            .test_steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let position = step
                    .position()
                    .unwrap_or_else(|| u32::try_from(index + 1).unwrap_or(u32::MAX));
                let status = session
                    .result(&step.step_id)
                    .or(step.step_status)
                    .unwrap_or_default();
                ResultRow::new(position, step.description.as_str())
                    .with_test_data(step.step_data.as_deref().unwrap_or(""))
                    .with_status(status.as_str())
            })
            .collect();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Encode as CSV text with a header row.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(HEADER.len() + 1 + self.rows.len() * 48);
        out.push_str(HEADER);
        out.push('\n');
        for row in &self.rows {
            out.push_str(&row.to_csv_line());
            out.push('\n');
        }
        out
    }

    /// Parse CSV text produced by either export path.
    ///
    /// A leading row whose first column is not a number is treated as the
    /// header. Quoted fields are unquoted (`""` inside quotes is a literal
    /// quote) and then sanitized like generated fields.
    pub fn parse(text: &str) -> Result<Self, ReportError> {
        let mut rows = Vec::new();
        let mut seen_first = false;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let fields = split_record(line, line_no)?;
            let first = !seen_first;
            seen_first = true;

            let position_field = fields.first().map(|f| f.trim()).unwrap_or_default();
            if first && position_field.parse::<u32>().is_err() {
                continue;
            }

            if fields.len() != COLUMNS {
                return Err(ReportError::ColumnCount {
                    line: line_no,
                    found: fields.len(),
                });
            }

            let position = position_field
                .parse::<u32>()
                .map_err(|_| ReportError::InvalidPosition {
                    line: line_no,
                    value: position_field.to_string(),
                })?;

            rows.push(
                ResultRow::new(position, sanitize_field(&fields[1]))
                    .with_test_data(sanitize_field(&fields[2]))
                    .with_status(sanitize_field(fields[3].trim())),
            );
        }

        Ok(Self { rows })
    }
}

fn split_record(line: &str, line_no: usize) -> Result<Vec<String>, ReportError> {
    let mut fields = Vec::with_capacity(COLUMNS);
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err(ReportError::UnterminatedQuote { line: line_no });
    }
    fields.push(current);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TestStep;

    fn sample_case() -> TestCase {
        TestCase::new("tc-1", "Login flow").with_steps(vec![
            TestStep::new("s1", "Open login, then wait")
                .with_order(1)
                .with_step_data("user=a,b"),
            TestStep::new("s2", "Submit\nform")
                .with_order(2)
                .with_status(StepStatus::Failed),
            TestStep::new("s3", "Check banner").with_order(3),
        ])
    }

    #[test]
    fn rows_prefer_session_results() {
        let mut session = ExecutionSession::new();
        session.record("s1", StepStatus::Success);

        let table = ResultsTable::from_case(&sample_case(), &session);
        let statuses: Vec<&str> = table.rows.iter().map(|r| r.status.as_str()).collect();
        assert_eq!(statuses, vec!["Success", "Failed", "Not Run"]);
        assert_eq!(table.rows[0].test_data, "user=a,b");
    }

    #[test]
    fn encode_replaces_separators_in_free_text() {
        let table = ResultsTable::from_case(&sample_case(), &ExecutionSession::new());
        let text = table.encode();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "1,Open login; then wait,user=a;b,Not Run");
        assert_eq!(lines[2], "2,Submit form,,Failed");
        assert_eq!(lines.len(), 4);
        for line in &lines[1..] {
            assert_eq!(line.matches(',').count(), COLUMNS - 1);
        }
    }

    #[test]
    fn parse_accepts_generated_output() {
        let table = ResultsTable::from_case(&sample_case(), &ExecutionSession::new());
        let parsed = ResultsTable::parse(&table.encode()).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed.rows[0].description, "Open login; then wait");
    }

    #[test]
    fn parse_unquotes_server_fields() {
        let text = "Step Number,Description,Test Data,Status\r\n1,\"Open, then \"\"wait\"\"\",,Success\r\n";
        let parsed = ResultsTable::parse(text).unwrap();
        assert_eq!(
            parsed.rows,
            vec![ResultRow::new(1, "Open; then \"wait\"").with_status("Success")]
        );
    }

    #[test]
    fn parse_without_header() {
        let parsed = ResultsTable::parse("1,a,,Passed\n\n2,b,x,Failed\n").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.rows[1].test_data, "x");
    }

    #[test]
    fn parse_rejects_malformed_rows() {
        let err = ResultsTable::parse("Step Number,Description,Test Data,Status\n1,a,b\n").unwrap_err();
        assert!(matches!(err, ReportError::ColumnCount { line: 2, found: 3 }));

        let err = ResultsTable::parse("1,a,b,Success\nx,a,b,Success\n").unwrap_err();
        assert!(matches!(err, ReportError::InvalidPosition { line: 2, .. }));

        let err = ResultsTable::parse("1,\"open,a,b,Success\n").unwrap_err();
        assert!(matches!(err, ReportError::UnterminatedQuote { line: 1 }));
    }
}
