//! Step poller: one background timer per polled step.
//!
//! Each timer is a tokio task that fetches the step's status on a fixed
//! interval and forwards the result over a channel. The poller never
//! interprets responses; the owning view feeds them to the sequencer.
//! A failed fetch is reported and the timer keeps running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use testlab_core::{TestCaseScope, TestStep};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::TestLabApi;
use crate::client::ClientError;

/// Result of one poll tick.
#[derive(Debug)]
pub enum PollEvent {
    Fetched { step_id: String, step: TestStep },
    FetchFailed { step_id: String, error: ClientError },
}

impl PollEvent {
    pub fn step_id(&self) -> &str {
        match self {
            Self::Fetched { step_id, .. } | Self::FetchFailed { step_id, .. } => step_id,
        }
    }
}

#[derive(Debug)]
struct PollTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollTimer {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Owns the live poll timers for one test case.
pub struct StepPoller {
    api: Arc<dyn TestLabApi>,
    scope: TestCaseScope,
    interval: Duration,
    events: mpsc::UnboundedSender<PollEvent>,
    timers: HashMap<String, PollTimer>,
}

impl std::fmt::Debug for StepPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepPoller")
            .field("scope", &self.scope)
            .field("interval", &self.interval)
            .field("timers", &self.timers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl StepPoller {
    /// Create a poller and the receiving end of its event channel.
    pub fn new(
        api: Arc<dyn TestLabApi>,
        scope: TestCaseScope,
        interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PollEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let poller = Self {
            api,
            scope,
            interval,
            events,
            timers: HashMap::new(),
        };
        (poller, rx)
    }

    pub fn is_active(&self, step_id: &str) -> bool {
        self.timers.contains_key(step_id)
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    /// Start a timer for `step_id`. Returns false if one already exists.
    ///
    /// The first fetch happens one interval after registration.
    pub fn register(&mut self, step_id: &str) -> bool {
        if self.timers.contains_key(step_id) {
            debug!(step_id, "poll timer already registered");
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.api),
            self.scope.clone(),
            step_id.to_string(),
            self.interval,
            self.events.clone(),
            cancel.clone(),
        ));

        debug!(step_id, interval_ms = self.interval.as_millis() as u64, "poll timer registered");
        self.timers
            .insert(step_id.to_string(), PollTimer { cancel, handle });
        true
    }

    /// Stop the timer for `step_id`, if any.
    pub fn unregister(&mut self, step_id: &str) -> bool {
        let Some(timer) = self.timers.remove(step_id) else {
            return false;
        };
        timer.stop();
        debug!(step_id, "poll timer cleared");
        true
    }

    /// Stop every timer; returns how many were live.
    pub fn clear(&mut self) -> usize {
        let count = self.timers.len();
        for (step_id, timer) in self.timers.drain() {
            timer.stop();
            debug!(step_id = %step_id, "poll timer cleared");
        }
        count
    }
}

impl Drop for StepPoller {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn poll_loop(
    api: Arc<dyn TestLabApi>,
    scope: TestCaseScope,
    step_id: String,
    period: Duration,
    events: mpsc::UnboundedSender<PollEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = api.get_test_step(&scope, &step_id) => result,
        };

        let event = match result {
            Ok(step) => PollEvent::Fetched {
                step_id: step_id.clone(),
                step,
            },
            Err(error) => {
                warn!(step_id = %step_id, error = %error, "step status fetch failed");
                PollEvent::FetchFailed {
                    step_id: step_id.clone(),
                    error,
                }
            }
        };

        if cancel.is_cancelled() || events.send(event).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_case, scope, FakeApi};
    use testlab_core::StepStatus;

    const INTERVAL: Duration = Duration::from_millis(3000);

    fn poller(api: &Arc<FakeApi>) -> (StepPoller, mpsc::UnboundedReceiver<PollEvent>) {
        let api: Arc<dyn TestLabApi> = Arc::clone(api) as Arc<dyn TestLabApi>;
        StepPoller::new(api, scope(), INTERVAL)
    }

    #[tokio::test(start_paused = true)]
    async fn register_is_idempotent() {
        let api = Arc::new(FakeApi::new(sample_case(2)));
        let (mut poller, mut rx) = poller(&api);

        assert!(poller.register("s1"));
        assert!(!poller.register("s1"));
        assert_eq!(poller.active_count(), 1);

        // One timer means one fetch per interval.
        let deadline = Instant::now() + INTERVAL * 3 + INTERVAL / 2;
        let mut received = 0;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            assert_eq!(event.step_id(), "s1");
            received += 1;
        }
        assert_eq!(received, 3);
        assert_eq!(api.count_calls("get_step:s1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_fetch_waits_one_interval() {
        let api = Arc::new(FakeApi::new(sample_case(1)));
        let (mut poller, mut rx) = poller(&api);
        let started = Instant::now();

        poller.register("s1");
        rx.recv().await.unwrap();

        assert!(started.elapsed() >= INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn fetched_event_carries_step_status() {
        let api = Arc::new(FakeApi::new(sample_case(1)));
        api.script("s1", &[StepStatus::Executing, StepStatus::Success]);
        let (mut poller, mut rx) = poller(&api);
        poller.register("s1");

        let statuses: Vec<_> = [rx.recv().await.unwrap(), rx.recv().await.unwrap()]
            .into_iter()
            .map(|e| match e {
                PollEvent::Fetched { step, .. } => step.step_status,
                PollEvent::FetchFailed { .. } => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![Some(StepStatus::Executing), Some(StepStatus::Success)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_timer() {
        let api = Arc::new(FakeApi::new(sample_case(1)));
        api.fail_fetches("s1", 2);
        let (mut poller, mut rx) = poller(&api);
        poller.register("s1");

        assert!(matches!(rx.recv().await, Some(PollEvent::FetchFailed { .. })));
        assert!(matches!(rx.recv().await, Some(PollEvent::FetchFailed { .. })));
        assert!(matches!(rx.recv().await, Some(PollEvent::Fetched { .. })));
        assert!(poller.is_active("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_stops_fetching() {
        let api = Arc::new(FakeApi::new(sample_case(2)));
        let (mut poller, mut rx) = poller(&api);
        poller.register("s1");
        rx.recv().await.unwrap();

        assert!(poller.unregister("s1"));
        assert!(!poller.unregister("s1"));

        let next = tokio::time::timeout(INTERVAL * 5, rx.recv()).await;
        assert!(next.is_err(), "no events after unregister");
        assert_eq!(api.count_calls("get_step:s1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_every_timer() {
        let api = Arc::new(FakeApi::new(sample_case(3)));
        let (mut poller, mut rx) = poller(&api);
        poller.register("s1");
        poller.register("s2");

        assert_eq!(poller.clear(), 2);
        assert_eq!(poller.active_count(), 0);

        let next = tokio::time::timeout(INTERVAL * 3, rx.recv()).await;
        assert!(next.is_err());
        assert_eq!(api.count_calls("get_step"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_closes_the_channel() {
        let api = Arc::new(FakeApi::new(sample_case(1)));
        let (mut poller, mut rx) = poller(&api);
        poller.register("s1");
        drop(poller);

        // Sender and every task-held clone are gone once the tasks exit.
        assert!(rx.recv().await.is_none());
    }
}
