//! Execution sequencer for a test case run.
//!
//! States: `Idle`, `Running(current_index)`, `Completed`. Steps execute
//! strictly in sequence: step i+1 is only marked `Executing` (and handed to the
//! poller) once step i reports a terminal status. The sequencer never touches
//! timers itself; callers apply the returned [`Transition`] to their poller.

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::ExecutionSession;
use crate::status::aggregate_status;
use crate::types::{CaseStatus, StepStatus, TestCase};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequencerError {
    #[error("no steps to execute")]
    NoSteps,
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error("step {step_id} reported out of sequence (expected {expected:?})")]
    OutOfSequence {
        step_id: String,
        expected: Option<String>,
    },
}

pub type Result<T> = std::result::Result<T, SequencerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequencerState {
    #[default]
    Idle,
    Running {
        current_index: usize,
    },
    Completed,
}

impl SequencerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running { .. } => "running",
            Self::Completed => "completed",
        }
    }
}

/// Outcome of feeding an event into the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Run accepted; the first step must be polled.
    Started { step_id: String },
    /// A polled step moved to a new non-terminal status.
    StatusChanged { step_id: String, status: StepStatus },
    /// Nothing changed.
    Unchanged,
    /// Response for a step that is not being polled (stale or late).
    Ignored { step_id: String },
    /// A step finished and its successor is now executing.
    Advanced {
        finished: String,
        status: StepStatus,
        next: String,
        index: usize,
    },
    /// The last step finished.
    Completed {
        finished: String,
        status: StepStatus,
        aggregate: CaseStatus,
    },
}

impl Transition {
    /// Step that must start polling after this transition.
    pub fn register(&self) -> Option<&str> {
        match self {
            Self::Started { step_id } => Some(step_id),
            Self::Advanced { next, .. } => Some(next),
            _ => None,
        }
    }

    /// Step that must stop polling after this transition.
    pub fn unregister(&self) -> Option<&str> {
        match self {
            Self::Advanced { finished, .. } | Self::Completed { finished, .. } => Some(finished),
            _ => None,
        }
    }
}

/// Run progress, recomputed from recorded results on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
}

impl Progress {
    pub fn compute(completed: usize, total: usize) -> Self {
        let percent = if total == 0 {
            0
        } else {
            ((completed.min(total) as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            completed,
            total,
            percent,
        }
    }
}

/// State machine driving one test case's run.
#[derive(Debug, Default)]
pub struct ExecutionSequencer {
    state: SequencerState,
    session: ExecutionSession,
    /// Case status before the run, kept for aggregation when a run ends early.
    prior_status: CaseStatus,
}

impl ExecutionSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn session(&self) -> &ExecutionSession {
        &self.session
    }

    pub fn is_executing(&self) -> bool {
        self.session.is_executing()
    }

    pub fn progress(&self, total_steps: usize) -> Progress {
        Progress::compute(self.session.completed_count(), total_steps)
    }

    /// Validate a run request and clear any prior execution state.
    ///
    /// Fails without touching state when the case has no steps or a run is
    /// already in flight.
    pub fn begin(&mut self, test_case: &TestCase) -> Result<()> {
        if matches!(self.state, SequencerState::Running { .. }) {
            return Err(SequencerError::AlreadyRunning);
        }
        if test_case.test_steps.is_empty() {
            return Err(SequencerError::NoSteps);
        }
        self.reset();
        self.prior_status = test_case.test_case_status.clone();
        Ok(())
    }

    /// Enter `Running(0)` with the test case returned by the execute request.
    pub fn start(&mut self, test_case: &mut TestCase) -> Result<Transition> {
        if matches!(self.state, SequencerState::Running { .. }) {
            return Err(SequencerError::AlreadyRunning);
        }
        let Some(first) = test_case.test_steps.first_mut() else {
            self.reset();
            return Err(SequencerError::NoSteps);
        };

        first.step_status = Some(StepStatus::Executing);
        let step_id = first.step_id.clone();

        self.session.record(&step_id, StepStatus::Executing);
        self.session.start_polling(&step_id);
        self.session.set_current_index(Some(0));
        self.session.set_executing(true);
        self.state = SequencerState::Running { current_index: 0 };
        test_case.test_case_status = CaseStatus::InProgress;

        info!(
            test_case_id = %test_case.test_case_id,
            step_id = %step_id,
            total_steps = test_case.test_steps.len(),
            "run started"
        );
        Ok(Transition::Started { step_id })
    }

    /// Feed a poll response for `step_id` into the state machine.
    ///
    /// A response without a status is treated as "still running". A response
    /// for a step other than the current one halts the run.
    pub fn observe(
        &mut self,
        test_case: &mut TestCase,
        step_id: &str,
        status: Option<StepStatus>,
    ) -> Result<Transition> {
        let SequencerState::Running { current_index } = self.state else {
            return Ok(Transition::Ignored {
                step_id: step_id.to_string(),
            });
        };

        if !self.session.is_polling(step_id) {
            debug!(step_id, "ignoring response for step not being polled");
            return Ok(Transition::Ignored {
                step_id: step_id.to_string(),
            });
        }

        let Some(status) = status else {
            return Ok(Transition::Unchanged);
        };

        let expected = test_case
            .test_steps
            .get(current_index)
            .map(|s| s.step_id.clone());
        if expected.as_deref() != Some(step_id) {
            warn!(
                step_id,
                expected = ?expected,
                current_index,
                "poll response out of sequence, halting run"
            );
            self.halt(test_case);
            return Err(SequencerError::OutOfSequence {
                step_id: step_id.to_string(),
                expected,
            });
        }

        let changed = self.session.record(step_id, status);
        if changed {
            if let Some(step) = test_case.test_steps.get_mut(current_index) {
                step.step_status = Some(status);
            }
        }

        if !status.is_terminal() {
            return Ok(if changed {
                Transition::StatusChanged {
                    step_id: step_id.to_string(),
                    status,
                }
            } else {
                Transition::Unchanged
            });
        }

        self.session.stop_polling(step_id);
        test_case.execution_date_time = Some(Utc::now());

        let next_index = current_index + 1;
        if let Some(next) = test_case.test_steps.get_mut(next_index) {
            next.step_status = Some(StepStatus::Executing);
            let next_id = next.step_id.clone();

            self.session.record(&next_id, StepStatus::Executing);
            self.session.start_polling(&next_id);
            self.session.set_current_index(Some(next_index));
            self.state = SequencerState::Running {
                current_index: next_index,
            };

            info!(
                finished = step_id,
                status = %status,
                next = %next_id,
                index = next_index,
                "advancing to next step"
            );
            return Ok(Transition::Advanced {
                finished: step_id.to_string(),
                status,
                next: next_id,
                index: next_index,
            });
        }

        self.session.set_executing(false);
        self.session.set_current_index(None);
        self.state = SequencerState::Completed;

        let aggregate = self.aggregate(test_case);
        test_case.test_case_status = aggregate.clone();

        info!(
            test_case_id = %test_case.test_case_id,
            aggregate = %aggregate,
            "all steps completed"
        );
        Ok(Transition::Completed {
            finished: step_id.to_string(),
            status,
            aggregate,
        })
    }

    /// Stop the run where it stands.
    ///
    /// Steps that were being polled end `Blocked`, in the session and in
    /// `test_case`, and the case status is re-derived from its steps. Returns
    /// the identifiers that were being polled so the caller can clear their
    /// timers. No-op outside a run.
    pub fn halt(&mut self, test_case: &mut TestCase) -> Vec<String> {
        if !matches!(self.state, SequencerState::Running { .. }) {
            return Vec::new();
        }

        let polled = self.session.drain_polling();
        for step_id in &polled {
            self.session.record(step_id, StepStatus::Blocked);
            if let Some(step) = test_case.step_mut(step_id) {
                step.step_status = Some(StepStatus::Blocked);
            }
        }
        self.session.set_executing(false);
        self.session.set_current_index(None);
        self.state = SequencerState::Idle;
        test_case.test_case_status = self.aggregate(test_case);

        warn!(
            test_case_id = %test_case.test_case_id,
            blocked = ?polled,
            status = %test_case.test_case_status,
            "run halted"
        );
        polled
    }

    /// Case status from recorded results, falling back to each step's own.
    fn aggregate(&self, test_case: &TestCase) -> CaseStatus {
        aggregate_status(
            test_case
                .test_steps
                .iter()
                .map(|s| self.session.result(&s.step_id).unwrap_or_else(|| s.status())),
            &self.prior_status,
        )
    }

    /// Return to `Idle` with an empty session.
    pub fn reset(&mut self) {
        self.session.reset();
        self.state = SequencerState::Idle;
    }
}
