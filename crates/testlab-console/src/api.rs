//! The TestLab REST API as seen by the console.
//!
//! Everything above the HTTP layer talks to `Arc<dyn TestLabApi>` so the
//! poller, view, and exporter run unchanged against the real client or an
//! in-memory fake.

use async_trait::async_trait;
use serde::Serialize;
use testlab_core::{ModuleDetails, StepStatus, TestCase, TestCaseScope, TestStep};

use crate::client::ClientError;

/// Request payload for creating a test step
/// (POST .../testcases/{id}/teststeps).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTestStepRequest {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_data: Option<String>,
    pub step_status: StepStatus,
    /// 1-based position, string-encoded.
    pub order: String,
}

/// Raw results artifact returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultsDownload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

impl ResultsDownload {
    pub fn is_pdf(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/pdf"))
    }

    pub fn is_csv(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("text/csv"))
    }
}

#[async_trait]
pub trait TestLabApi: Send + Sync {
    /// GET .../projects/{p}/modules/{m}
    async fn module_details(
        &self,
        project_id: &str,
        module_id: &str,
    ) -> Result<ModuleDetails, ClientError>;

    /// GET .../testcases/{id}
    async fn get_test_case(&self, scope: &TestCaseScope) -> Result<TestCase, ClientError>;

    /// POST .../testcases/{id}/execute
    async fn execute_test_case(&self, scope: &TestCaseScope) -> Result<TestCase, ClientError>;

    /// GET .../testcases/{id}/teststeps/{stepId}
    async fn get_test_step(
        &self,
        scope: &TestCaseScope,
        step_id: &str,
    ) -> Result<TestStep, ClientError>;

    /// POST .../testcases/{id}/teststeps
    async fn create_test_step(
        &self,
        scope: &TestCaseScope,
        req: &CreateTestStepRequest,
    ) -> Result<TestStep, ClientError>;

    /// PUT .../testcases/{id}/teststeps/{stepId} with `{ "order": ... }`
    async fn update_test_step_order(
        &self,
        scope: &TestCaseScope,
        step_id: &str,
        order: &str,
    ) -> Result<(), ClientError>;

    /// DELETE .../testcases/{id}/teststeps/{stepId}
    async fn delete_test_step(&self, scope: &TestCaseScope, step_id: &str)
        -> Result<(), ClientError>;

    /// GET .../testcases/{id}/results?action=download
    async fn download_results(&self, scope: &TestCaseScope)
        -> Result<ResultsDownload, ClientError>;

    /// Test cases of a module; empty when the module carries none.
    async fn list_test_cases(
        &self,
        project_id: &str,
        module_id: &str,
    ) -> Result<Vec<TestCase>, ClientError> {
        Ok(self.module_details(project_id, module_id).await?.test_cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_uses_wire_names() {
        let req = CreateTestStepRequest {
            description: "Open page".to_string(),
            step_data: None,
            step_status: StepStatus::NotRun,
            order: "3".to_string(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "description": "Open page",
                "stepStatus": "Not Run",
                "order": "3"
            })
        );
    }

    #[test]
    fn download_content_type_checks() {
        let download = ResultsDownload {
            content_type: Some("application/pdf".to_string()),
            ..ResultsDownload::default()
        };
        assert!(download.is_pdf());
        assert!(!download.is_csv());

        let download = ResultsDownload {
            content_type: Some("text/csv; charset=utf-8".to_string()),
            ..ResultsDownload::default()
        };
        assert!(download.is_csv());
    }
}
