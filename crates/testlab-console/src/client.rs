//! HTTP client for the TestLab REST service.
//!
//! Every step-level route is scoped as
//! `{api_root}/{project}/modules/{module}/testcases/{testCase}/...`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use testlab_core::{Config, ModuleDetails, TestCase, TestCaseScope, TestStep};
use thiserror::Error;
use tracing::debug;

use crate::api::{CreateTestStepRequest, ResultsDownload, TestLabApi};

/// Failures talking to the TestLab service.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Nothing answered at `addr`.
    #[error("TestLab service not reachable at {addr}\n  → check the base URL with: testlabctl config show\n  → or set TESTLAB_BASE_URL")]
    ConnectionFailed { addr: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    /// Non-success status. `message` comes from the error body when present.
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    /// A 404, naming the resource that was asked for.
    #[error("{0} not found")]
    NotFound(String),

    /// The body did not decode into the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// True when the server answered with a body that could not be decoded.
    pub fn is_malformed_response(&self) -> bool {
        matches!(self, Self::InvalidResponse(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        let addr = e
            .url()
            .map_or_else(|| "unknown".to_string(), ToString::to_string);
        if e.is_connect() {
            ClientError::ConnectionFailed { addr }
        } else if e.is_timeout() {
            ClientError::Timeout(addr)
        } else if e.is_decode() {
            ClientError::InvalidResponse(e.to_string())
        } else {
            ClientError::HttpError {
                status: e.status().map_or(0, |s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

/// Error body returned by the service. Either field may carry the message.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Body of the step order update.
#[derive(Debug, Serialize)]
struct UpdateOrderRequest<'a> {
    order: &'a str,
}

/// HTTP client for the TestLab service.
#[derive(Debug, Clone)]
pub struct Client {
    api_root: String,
    http: reqwest::Client,
}

impl Client {
    /// Create a client rooted at `api_root`, the prefix every project route
    /// hangs off. A trailing slash is ignored.
    pub fn new(api_root: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            api_root: api_root.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Create a client from the resolved config: base URL, API path, and
    /// request timeout.
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        Self::new(&config.api_root(), config.request_timeout())
    }

    /// Returns the API root (for error messages).
    pub fn addr(&self) -> &str {
        &self.api_root
    }

    /// JSON request headers for every route except the results download.
    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    /// `{api_root}/{project}/modules/{module}`, with each segment encoded.
    fn module_url(&self, project_id: &str, module_id: &str) -> String {
        format!(
            "{}/{}/modules/{}",
            self.api_root,
            urlencoding::encode(project_id),
            urlencoding::encode(module_id)
        )
    }

    fn case_url(&self, scope: &TestCaseScope) -> String {
        format!(
            "{}/testcases/{}",
            self.module_url(&scope.project_id, &scope.module_id),
            urlencoding::encode(&scope.test_case_id)
        )
    }

    fn step_url(&self, scope: &TestCaseScope, step_id: &str) -> String {
        format!(
            "{}/teststeps/{}",
            self.case_url(scope),
            urlencoding::encode(step_id)
        )
    }

    /// Map a non-success response to an error; `resource` names what a 404
    /// refers to.
    async fn handle_error(response: reqwest::Response, resource: &str) -> ClientError {
        let status = response.status().as_u16();

        if status == 404 {
            return ClientError::NotFound(resource.to_string());
        }

        let message = response
            .json::<ErrorResponse>()
            .await
            .ok()
            .and_then(|e| e.message.or(e.error))
            .unwrap_or_else(|| "unknown error".to_string());

        ClientError::HttpError { status, message }
    }

    /// Decode a success body as JSON. Decode failures become
    /// [`ClientError::InvalidResponse`].
    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        resource: &str,
    ) -> Result<T, ClientError> {
        if !response.status().is_success() {
            return Err(Self::handle_error(response, resource).await);
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// For routes whose success body is ignored.
    async fn expect_success(response: reqwest::Response, resource: &str) -> Result<(), ClientError> {
        if !response.status().is_success() {
            return Err(Self::handle_error(response, resource).await);
        }
        Ok(())
    }
}

#[async_trait]
impl TestLabApi for Client {
    /// `GET .../modules/{module}`: the module and its test case summaries.
    async fn module_details(
        &self,
        project_id: &str,
        module_id: &str,
    ) -> Result<ModuleDetails, ClientError> {
        let url = self.module_url(project_id, module_id);
        debug!(%url, "fetching module details");
        let response = self.http.get(&url).headers(Self::headers()).send().await?;
        Self::decode(response, "module").await
    }

    /// `GET .../testcases/{testCase}`: the case with its steps.
    async fn get_test_case(&self, scope: &TestCaseScope) -> Result<TestCase, ClientError> {
        let url = self.case_url(scope);
        let response = self.http.get(&url).headers(Self::headers()).send().await?;
        Self::decode(response, "test case").await
    }

    /// `POST .../testcases/{testCase}/execute`: ask the server to start a
    /// run. Returns the case as the server sees it after accepting.
    async fn execute_test_case(&self, scope: &TestCaseScope) -> Result<TestCase, ClientError> {
        let url = format!("{}/execute", self.case_url(scope));
        debug!(%url, "requesting execution");
        let response = self.http.post(&url).headers(Self::headers()).send().await?;
        Self::decode(response, "test case").await
    }

    /// `GET .../teststeps/{step}`: one step, polled for its status.
    async fn get_test_step(
        &self,
        scope: &TestCaseScope,
        step_id: &str,
    ) -> Result<TestStep, ClientError> {
        let url = self.step_url(scope, step_id);
        let response = self.http.get(&url).headers(Self::headers()).send().await?;
        Self::decode(response, "test step").await
    }

    /// `POST .../teststeps`: create a step and return it with its new id.
    /// A 404 here means the test case is gone.
    async fn create_test_step(
        &self,
        scope: &TestCaseScope,
        req: &CreateTestStepRequest,
    ) -> Result<TestStep, ClientError> {
        let url = format!("{}/teststeps", self.case_url(scope));
        let response = self
            .http
            .post(&url)
            .headers(Self::headers())
            .json(req)
            .send()
            .await?;
        Self::decode(response, "test case").await
    }

    /// `PUT .../teststeps/{step}` with `{"order": "<n>"}`.
    async fn update_test_step_order(
        &self,
        scope: &TestCaseScope,
        step_id: &str,
        order: &str,
    ) -> Result<(), ClientError> {
        let url = self.step_url(scope, step_id);
        let response = self
            .http
            .put(&url)
            .headers(Self::headers())
            .json(&UpdateOrderRequest { order })
            .send()
            .await?;
        Self::expect_success(response, "test step").await
    }

    /// `DELETE .../teststeps/{step}`.
    async fn delete_test_step(
        &self,
        scope: &TestCaseScope,
        step_id: &str,
    ) -> Result<(), ClientError> {
        let url = self.step_url(scope, step_id);
        let response = self.http.delete(&url).headers(Self::headers()).send().await?;
        Self::expect_success(response, "test step").await
    }

    /// `GET .../results?action=download`: the server-side results artifact.
    ///
    /// Sent without the JSON `Accept` header since the body may be CSV or a
    /// binary document. The content headers are kept for naming the file.
    async fn download_results(
        &self,
        scope: &TestCaseScope,
    ) -> Result<ResultsDownload, ClientError> {
        let url = format!("{}/results?action=download", self.case_url(scope));
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::handle_error(response, "test results").await);
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let content_disposition = header(CONTENT_DISPOSITION);
        let bytes = response.bytes().await?.to_vec();

        Ok(ResultsDownload {
            bytes,
            content_type,
            content_disposition,
        })
    }
}
