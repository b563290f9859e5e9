//! In-memory `TestLabApi` used by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use testlab_core::{ModuleDetails, StepStatus, TestCase, TestCaseScope, TestStep};

use crate::api::{CreateTestStepRequest, ResultsDownload, TestLabApi};
use crate::client::ClientError;

pub(crate) fn scope() -> TestCaseScope {
    TestCaseScope::new("p1", "m1", "tc-1")
}

pub(crate) fn sample_case(n: usize) -> TestCase {
    let steps = (1..=n)
        .map(|i| {
            TestStep::new(format!("s{i}"), format!("step {i}"))
                .with_order(i)
                .with_status(StepStatus::NotRun)
        })
        .collect();
    TestCase::new("tc-1", "Login flow").with_steps(steps)
}

fn server_error(message: &str) -> ClientError {
    ClientError::HttpError {
        status: 500,
        message: message.to_string(),
    }
}

#[derive(Debug)]
pub(crate) struct FakeApi {
    case: Mutex<TestCase>,
    /// Statuses handed out by successive step fetches; the last one sticks.
    scripts: Mutex<HashMap<String, VecDeque<StepStatus>>>,
    failing_fetches: Mutex<HashMap<String, usize>>,
    malformed_steps: Mutex<HashSet<String>>,
    fail_execute: AtomicBool,
    fail_order_update_for: Mutex<Option<String>>,
    fail_case_fetch: AtomicBool,
    download: Mutex<Option<ResultsDownload>>,
    calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub(crate) fn new(case: TestCase) -> Self {
        Self {
            case: Mutex::new(case),
            scripts: Mutex::default(),
            failing_fetches: Mutex::default(),
            malformed_steps: Mutex::default(),
            fail_execute: AtomicBool::new(false),
            fail_order_update_for: Mutex::default(),
            fail_case_fetch: AtomicBool::new(false),
            download: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    pub(crate) fn script(&self, step_id: &str, statuses: &[StepStatus]) {
        self.scripts
            .lock()
            .unwrap()
            .insert(step_id.to_string(), statuses.iter().copied().collect());
    }

    /// Fail the next `times` fetches of `step_id`.
    pub(crate) fn fail_fetches(&self, step_id: &str, times: usize) {
        self.failing_fetches
            .lock()
            .unwrap()
            .insert(step_id.to_string(), times);
    }

    pub(crate) fn malformed_step(&self, step_id: &str) {
        self.malformed_steps
            .lock()
            .unwrap()
            .insert(step_id.to_string());
    }

    pub(crate) fn fail_execute(&self) {
        self.fail_execute.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_order_update_for(&self, step_id: &str) {
        *self.fail_order_update_for.lock().unwrap() = Some(step_id.to_string());
    }

    pub(crate) fn fail_case_fetch(&self) {
        self.fail_case_fetch.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_download(&self, download: ResultsDownload) {
        *self.download.lock().unwrap() = Some(download);
    }

    pub(crate) fn case(&self) -> TestCase {
        self.case.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TestLabApi for FakeApi {
    async fn module_details(
        &self,
        _project_id: &str,
        module_id: &str,
    ) -> Result<ModuleDetails, ClientError> {
        self.log("module_details".to_string());
        Ok(ModuleDetails {
            module_id: module_id.to_string(),
            module_name: "Auth".to_string(),
            test_cases: vec![self.case()],
        })
    }

    async fn get_test_case(&self, _scope: &TestCaseScope) -> Result<TestCase, ClientError> {
        self.log("get_case".to_string());
        if self.fail_case_fetch.load(Ordering::SeqCst) {
            return Err(server_error("case fetch failed"));
        }
        Ok(self.case())
    }

    async fn execute_test_case(&self, _scope: &TestCaseScope) -> Result<TestCase, ClientError> {
        self.log("execute".to_string());
        if self.fail_execute.load(Ordering::SeqCst) {
            return Err(server_error("execution failed"));
        }
        let mut case = self.case.lock().unwrap();
        for step in &mut case.test_steps {
            step.step_status = Some(StepStatus::NotRun);
        }
        Ok(case.clone())
    }

    async fn get_test_step(
        &self,
        _scope: &TestCaseScope,
        step_id: &str,
    ) -> Result<TestStep, ClientError> {
        self.log(format!("get_step:{step_id}"));

        {
            let mut failing = self.failing_fetches.lock().unwrap();
            if let Some(remaining) = failing.get_mut(step_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ClientError::Timeout(step_id.to_string()));
                }
            }
        }
        if self.malformed_steps.lock().unwrap().contains(step_id) {
            return Err(ClientError::InvalidResponse(
                "unknown step status: \"Exploded\"".to_string(),
            ));
        }

        let next = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.get_mut(step_id).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().copied()
                }
            })
        };

        let mut case = self.case.lock().unwrap();
        let step = case
            .step_mut(step_id)
            .ok_or_else(|| ClientError::NotFound("test step".to_string()))?;
        if let Some(status) = next {
            step.step_status = Some(status);
        }
        Ok(step.clone())
    }

    async fn create_test_step(
        &self,
        _scope: &TestCaseScope,
        req: &CreateTestStepRequest,
    ) -> Result<TestStep, ClientError> {
        self.log(format!("create_step:{}", req.order));
        let mut case = self.case.lock().unwrap();
        let id = format!("s{}", case.test_steps.len() + 1);
        let mut step = TestStep::new(id, req.description.as_str()).with_status(req.step_status);
        step.step_data.clone_from(&req.step_data);
        step.order = Some(req.order.clone());
        case.test_steps.push(step.clone());
        Ok(step)
    }

    async fn update_test_step_order(
        &self,
        _scope: &TestCaseScope,
        step_id: &str,
        order: &str,
    ) -> Result<(), ClientError> {
        self.log(format!("update_order:{step_id}={order}"));
        if self.fail_order_update_for.lock().unwrap().as_deref() == Some(step_id) {
            return Err(server_error("order update rejected"));
        }
        let mut case = self.case.lock().unwrap();
        let step = case
            .step_mut(step_id)
            .ok_or_else(|| ClientError::NotFound("test step".to_string()))?;
        step.order = Some(order.to_string());
        Ok(())
    }

    async fn delete_test_step(
        &self,
        _scope: &TestCaseScope,
        step_id: &str,
    ) -> Result<(), ClientError> {
        self.log(format!("delete_step:{step_id}"));
        let mut case = self.case.lock().unwrap();
        let before = case.test_steps.len();
        case.test_steps.retain(|s| s.step_id != step_id);
        if case.test_steps.len() == before {
            return Err(ClientError::NotFound("test step".to_string()));
        }
        Ok(())
    }

    async fn download_results(
        &self,
        _scope: &TestCaseScope,
    ) -> Result<ResultsDownload, ClientError> {
        self.log("download".to_string());
        self.download
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| server_error("export unavailable"))
    }
}
