//! Test case view: the single owner of a test case's execution state.
//!
//! The view holds the step list, the sequencer (and through it the execution
//! session), the poller, and the reorder coordinator. Every mutation is routed
//! through `&mut self`, so runs, reorders, and step edits never interleave.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use testlab_core::reorder::{plan_reorder, DropPosition, ReorderError};
use testlab_core::sequencer::SequencerError;
use testlab_core::{
    CaseStatus, ConsoleEvent, ExecutionSequencer, ExecutionSession, Progress, SequencerState,
    StepStatus, TestCase, TestCaseScope, TestStep, Transition,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{CreateTestStepRequest, TestLabApi};
use crate::client::ClientError;
use crate::export::{ExportError, ExportOutcome, ResultsExporter};
use crate::poller::{PollEvent, StepPoller};
use crate::reorder::{ReorderCoordinator, ReorderInProgress, ReorderReport};

#[derive(Debug, Error)]
pub enum ViewError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    #[error(transparent)]
    Reorder(#[from] ReorderError),
    #[error(transparent)]
    ReorderBusy(#[from] ReorderInProgress),
    #[error("step description must not be empty")]
    EmptyDescription,
    #[error("a run is in progress; wait for it to finish")]
    RunInProgress,
    #[error("run halted: {0}")]
    RunHalted(String),
    #[error("reorder failed after {applied} of {total} updates: {source}")]
    ReorderFailed {
        applied: usize,
        total: usize,
        source: ClientError,
    },
}

pub struct TestCaseView {
    api: Arc<dyn TestLabApi>,
    scope: TestCaseScope,
    test_case: TestCase,
    sequencer: ExecutionSequencer,
    poller: StepPoller,
    poll_events: mpsc::UnboundedReceiver<PollEvent>,
    reorder: ReorderCoordinator,
    observer: Option<mpsc::UnboundedSender<ConsoleEvent>>,
}

impl std::fmt::Debug for TestCaseView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCaseView")
            .field("scope", &self.scope)
            .field("state", &self.sequencer.state())
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl TestCaseView {
    /// Fetch the test case and build a view around it.
    pub async fn open(
        api: Arc<dyn TestLabApi>,
        scope: TestCaseScope,
        poll_interval: Duration,
    ) -> Result<Self, ViewError> {
        let mut test_case = api.get_test_case(&scope).await?;
        test_case.sort_steps();
        debug!(test_case = %scope, steps = test_case.test_steps.len(), "test case loaded");

        let (poller, poll_events) = StepPoller::new(Arc::clone(&api), scope.clone(), poll_interval);
        Ok(Self {
            api,
            scope,
            test_case,
            sequencer: ExecutionSequencer::new(),
            poller,
            poll_events,
            reorder: ReorderCoordinator::new(),
            observer: None,
        })
    }

    /// Send console events to `observer`.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<ConsoleEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn scope(&self) -> &TestCaseScope {
        &self.scope
    }

    pub fn test_case(&self) -> &TestCase {
        &self.test_case
    }

    pub fn session(&self) -> &ExecutionSession {
        self.sequencer.session()
    }

    pub fn state(&self) -> SequencerState {
        self.sequencer.state()
    }

    pub fn is_executing(&self) -> bool {
        self.sequencer.is_executing()
    }

    pub fn is_reordering(&self) -> bool {
        self.reorder.is_pending()
    }

    pub fn progress(&self) -> Progress {
        self.sequencer.progress(self.test_case.test_steps.len())
    }

    /// Number of live poll timers.
    pub fn active_polls(&self) -> usize {
        self.poller.active_count()
    }

    fn emit(&self, event: ConsoleEvent) {
        if let Some(observer) = &self.observer {
            // A dropped observer only means nobody is watching.
            let _ = observer.send(event);
        }
    }

    fn ensure_idle(&self) -> Result<(), ViewError> {
        if self.is_executing() {
            return Err(ViewError::RunInProgress);
        }
        if self.is_reordering() {
            return Err(ReorderInProgress.into());
        }
        Ok(())
    }

    /// Refetch the test case from the server.
    pub async fn reload(&mut self) -> Result<(), ViewError> {
        self.ensure_idle()?;
        let mut test_case = self.api.get_test_case(&self.scope).await?;
        test_case.sort_steps();
        self.test_case = test_case;
        Ok(())
    }

    // --- Execution ---

    /// Request server-side execution and start polling the first step.
    ///
    /// Prior execution state is cleared first. A failed execute request
    /// leaves the view idle with nothing registered.
    pub async fn start_run(&mut self) -> Result<(), ViewError> {
        if self.is_reordering() {
            return Err(ReorderInProgress.into());
        }
        self.sequencer.begin(&self.test_case)?;
        self.poller.clear();
        self.drain_stale_events();

        let mut test_case = match self.api.execute_test_case(&self.scope).await {
            Ok(test_case) => test_case,
            Err(e) => {
                error!(test_case = %self.scope, error = %e, "execute request failed");
                return Err(e.into());
            }
        };
        test_case.sort_steps();

        let transition = self.sequencer.start(&mut test_case)?;
        self.test_case = test_case;
        self.apply(&transition);
        Ok(())
    }

    /// Wait for the next poll result and feed it to the sequencer.
    ///
    /// Returns `None` when no run is active.
    pub async fn step(&mut self) -> Result<Option<Transition>, ViewError> {
        if !self.is_executing() {
            return Ok(None);
        }
        let Some(event) = self.poll_events.recv().await else {
            return Err(self.halt("poll channel closed"));
        };
        self.handle_poll_event(event)
    }

    /// Route one poll result.
    ///
    /// Transient fetch failures are reported and leave the timer running. A
    /// malformed response or an out-of-sequence result halts the run.
    pub fn handle_poll_event(&mut self, event: PollEvent) -> Result<Option<Transition>, ViewError> {
        match event {
            PollEvent::FetchFailed { step_id, error } => {
                if error.is_malformed_response() && self.session().is_polling(&step_id) {
                    return Err(self.halt(&format!("malformed response for step {step_id}: {error}")));
                }
                self.emit(ConsoleEvent::PollFailed {
                    step_id,
                    error: error.to_string(),
                });
                Ok(None)
            }
            PollEvent::Fetched { step_id, step } => {
                match self
                    .sequencer
                    .observe(&mut self.test_case, &step_id, step.step_status)
                {
                    Ok(transition) => {
                        self.apply(&transition);
                        Ok(Some(transition))
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        Err(self.halt(&reason))
                    }
                }
            }
        }
    }

    /// Start a run and drive it until every step is terminal.
    pub async fn run_to_completion(&mut self) -> Result<CaseStatus, ViewError> {
        self.start_run().await?;
        while self.is_executing() {
            self.step().await?;
        }
        Ok(self.test_case.test_case_status.clone())
    }

    fn apply(&mut self, transition: &Transition) {
        if let Some(step_id) = transition.unregister() {
            self.poller.unregister(step_id);
        }
        if let Some(step_id) = transition.register() {
            self.poller.register(step_id);
        }

        let total = self.test_case.test_steps.len();
        match transition {
            Transition::Started { step_id } => self.emit(ConsoleEvent::RunStarted {
                test_case_id: self.test_case.test_case_id.clone(),
                step_id: step_id.clone(),
                total,
            }),
            Transition::StatusChanged { step_id, status } => {
                self.emit(ConsoleEvent::StepStatusChanged {
                    step_id: step_id.clone(),
                    status: *status,
                });
            }
            Transition::Advanced {
                finished,
                status,
                next,
                index,
            } => {
                let progress = self.progress();
                self.emit(ConsoleEvent::StepAdvanced {
                    finished: finished.clone(),
                    status: *status,
                    next: next.clone(),
                    index: *index,
                    total,
                    completed: progress.completed,
                    percent: progress.percent,
                });
            }
            Transition::Completed { aggregate, .. } => {
                let progress = self.progress();
                info!(
                    test_case = %self.scope,
                    status = %aggregate,
                    completed = progress.completed,
                    total,
                    "run completed"
                );
                self.emit(ConsoleEvent::RunCompleted {
                    test_case_id: self.test_case.test_case_id.clone(),
                    status: aggregate.clone(),
                    completed: progress.completed,
                    total,
                });
            }
            Transition::Unchanged | Transition::Ignored { .. } => {}
        }
    }

    /// Stop the run, clear every timer, and report why.
    fn halt(&mut self, reason: &str) -> ViewError {
        warn!(test_case = %self.scope, reason, "halting run");
        self.sequencer.halt(&mut self.test_case);
        self.poller.clear();
        self.drain_stale_events();
        self.emit(ConsoleEvent::RunHalted {
            reason: reason.to_string(),
        });
        ViewError::RunHalted(reason.to_string())
    }

    fn drain_stale_events(&mut self) {
        while self.poll_events.try_recv().is_ok() {}
    }

    /// Abandon any run: clear timers and reset the session to empty.
    pub fn teardown(&mut self) {
        let was_executing = self.is_executing();
        self.sequencer.halt(&mut self.test_case);
        let cleared = self.poller.clear();
        self.sequencer.reset();
        self.drain_stale_events();
        debug!(test_case = %self.scope, cleared, "view torn down");
        if was_executing {
            self.emit(ConsoleEvent::RunHalted {
                reason: "view torn down".to_string(),
            });
        }
    }

    // --- Step editing ---

    /// Move `source` next to `target` and persist the new order.
    ///
    /// Without an explicit position the drop intent follows drag direction.
    /// The local list is always replaced by the server's copy afterwards.
    pub async fn reorder(
        &mut self,
        source: &str,
        target: &str,
        position: Option<DropPosition>,
    ) -> Result<ReorderReport, ViewError> {
        self.ensure_idle()?;

        let position = match position {
            Some(p) => p,
            None => {
                let source_index = self
                    .test_case
                    .step_index(source)
                    .ok_or_else(|| ReorderError::UnknownStep(source.to_string()))?;
                let target_index = self
                    .test_case
                    .step_index(target)
                    .ok_or_else(|| ReorderError::UnknownStep(target.to_string()))?;
                DropPosition::inferred(source_index, target_index)
            }
        };
        let plan = plan_reorder(&self.test_case.test_steps, source, target, position)?;
        debug!(
            source,
            target,
            position = position.as_str(),
            order = ?plan.step_ids(),
            "reorder planned"
        );

        let mut report = self
            .reorder
            .apply(self.api.as_ref(), &self.scope, &plan)
            .await?;

        if let Some(test_case) = report.refreshed.take() {
            self.test_case = test_case;
        }

        if let Some((_, error)) = report.update_error.take() {
            self.emit(ConsoleEvent::ReorderFailed {
                applied: report.applied,
                total: report.total,
                error: error.to_string(),
            });
            return Err(ViewError::ReorderFailed {
                applied: report.applied,
                total: report.total,
                source: error,
            });
        }
        if let Some(error) = report.refresh_error.take() {
            // Updates landed but the list could not be confirmed.
            self.test_case.test_steps = plan.steps;
            self.emit(ConsoleEvent::ReorderFailed {
                applied: report.applied,
                total: report.total,
                error: error.to_string(),
            });
            return Err(error.into());
        }

        self.emit(ConsoleEvent::ReorderApplied {
            step_ids: self.test_case.step_ids(),
        });
        Ok(report)
    }

    /// Create a step at the end of the list, then refetch.
    pub async fn add_step(
        &mut self,
        description: &str,
        step_data: Option<&str>,
    ) -> Result<TestStep, ViewError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(ViewError::EmptyDescription);
        }
        self.ensure_idle()?;

        let req = CreateTestStepRequest {
            description: description.to_string(),
            step_data: step_data
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            step_status: StepStatus::NotRun,
            order: (self.test_case.test_steps.len() + 1).to_string(),
        };
        let step = self.api.create_test_step(&self.scope, &req).await?;
        info!(test_case = %self.scope, step_id = %step.step_id, order = %req.order, "step created");

        self.reload().await?;
        Ok(step)
    }

    /// Delete a step, then refetch.
    pub async fn delete_step(&mut self, step_id: &str) -> Result<(), ViewError> {
        self.ensure_idle()?;
        self.api.delete_test_step(&self.scope, step_id).await?;
        info!(test_case = %self.scope, step_id, "step deleted");
        self.reload().await
    }

    // --- Export ---

    pub async fn export(&self, dir: &Path) -> Result<ExportOutcome, ExportError> {
        ResultsExporter::new(self.api.as_ref(), &self.scope)
            .export(&self.test_case, self.session(), dir)
            .await
    }
}
