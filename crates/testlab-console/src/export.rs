//! Results export with a local CSV fallback.
//!
//! The server-generated artifact is preferred. When it cannot be fetched,
//! validated, or written, the table is synthesized from the step list and the
//! session's recorded results.

use std::path::{Path, PathBuf};

use testlab_core::report::{ReportError, ResultsTable};
use testlab_core::{ExecutionSession, TestCase, TestCaseScope};
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ResultsDownload, TestLabApi};
use crate::client::ClientError;

const DEFAULT_FILENAME: &str = "test_results";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no steps to export")]
    NoSteps,
    #[error("no execution results to export yet; run the test case first")]
    NoResults,
    #[error("export failed: server export: {primary}; local export: {fallback}")]
    Failed {
        primary: PrimaryFailure,
        fallback: ReportError,
    },
}

/// Why the server path was abandoned.
#[derive(Debug, Error)]
pub enum PrimaryFailure {
    #[error(transparent)]
    Request(#[from] ClientError),
    #[error("server returned unreadable results: {0}")]
    Invalid(ReportError),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportSource {
    Server,
    Fallback,
}

impl ExportSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Fallback => "local",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub source: ExportSource,
    pub bytes: usize,
}

/// Exports results for one test case.
pub struct ResultsExporter<'a> {
    api: &'a dyn TestLabApi,
    scope: &'a TestCaseScope,
}

impl std::fmt::Debug for ResultsExporter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultsExporter")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl<'a> ResultsExporter<'a> {
    pub fn new(api: &'a dyn TestLabApi, scope: &'a TestCaseScope) -> Self {
        Self { api, scope }
    }

    /// Export into `dir`, refusing when there is nothing to export.
    pub async fn export(
        &self,
        test_case: &TestCase,
        session: &ExecutionSession,
        dir: &Path,
    ) -> Result<ExportOutcome, ExportError> {
        if test_case.test_steps.is_empty() {
            return Err(ExportError::NoSteps);
        }
        if !session.has_results() {
            return Err(ExportError::NoResults);
        }

        let primary = match self.export_from_server(dir).await {
            Ok(outcome) => {
                info!(path = %outcome.path.display(), bytes = outcome.bytes, "exported server results");
                return Ok(outcome);
            }
            Err(failure) => {
                warn!(test_case = %self.scope, error = %failure, "server export failed, generating locally");
                failure
            }
        };

        match export_locally(test_case, session, dir).await {
            Ok(outcome) => {
                info!(path = %outcome.path.display(), rows = test_case.test_steps.len(), "exported local results");
                Ok(outcome)
            }
            Err(fallback) => Err(ExportError::Failed { primary, fallback }),
        }
    }

    async fn export_from_server(&self, dir: &Path) -> Result<ExportOutcome, PrimaryFailure> {
        let download = self.api.download_results(self.scope).await?;

        if download.is_csv() {
            let text = String::from_utf8_lossy(&download.bytes);
            ResultsTable::parse(&text).map_err(PrimaryFailure::Invalid)?;
        }

        let path = dir.join(server_filename(&download));
        tokio::fs::write(&path, &download.bytes)
            .await
            .map_err(|source| PrimaryFailure::Write {
                path: path.clone(),
                source,
            })?;

        Ok(ExportOutcome {
            path,
            source: ExportSource::Server,
            bytes: download.bytes.len(),
        })
    }
}

async fn export_locally(
    test_case: &TestCase,
    session: &ExecutionSession,
    dir: &Path,
) -> Result<ExportOutcome, ReportError> {
    let table = ResultsTable::from_case(test_case, session);
    let path = dir.join(fallback_filename(&test_case.test_case_name));
    let encoded = table.encode();
    tokio::fs::write(&path, &encoded).await?;
    Ok(ExportOutcome {
        path,
        source: ExportSource::Fallback,
        bytes: encoded.len(),
    })
}

/// Filename for a server artifact.
///
/// Taken from `content-disposition`: `filename*=charset''...` (RFC 6266) wins
/// over `filename=...`, parameter names match case-insensitively, quotes and
/// any directory part are dropped. Otherwise `test_results`. A name without
/// extension gets `.pdf` for PDF content and `.csv` otherwise.
pub fn server_filename(download: &ResultsDownload) -> String {
    let name = download
        .content_disposition
        .as_deref()
        .and_then(filename_from_disposition)
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string());

    if Path::new(&name).extension().is_some() {
        name
    } else if download.is_pdf() {
        format!("{name}.pdf")
    } else {
        format!("{name}.csv")
    }
}

fn filename_from_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in header.split(';') {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => extended = decode_ext_value(value),
            "filename" => plain = Some(unquote(value).to_string()),
            _ => {}
        }
    }

    let name = extended.or(plain)?;
    let base = Path::new(&name).file_name()?.to_str()?.trim();
    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}

/// Decode an RFC 5987 `charset'lang'percent-encoded` value.
fn decode_ext_value(value: &str) -> Option<String> {
    let mut parts = value.splitn(3, '\'');
    let _charset = parts.next()?;
    let _language = parts.next()?;
    let encoded = unquote(parts.next()?);
    urlencoding::decode(encoded).ok().map(|name| name.into_owned())
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '"' || c == '\'')
}

/// Local filename: case name with whitespace runs replaced by `_`.
pub fn fallback_filename(test_case_name: &str) -> String {
    let stem = test_case_name.split_whitespace().collect::<Vec<_>>().join("_");
    if stem.is_empty() {
        format!("{DEFAULT_FILENAME}.csv")
    } else {
        format!("{stem}_results.csv")
    }
}
