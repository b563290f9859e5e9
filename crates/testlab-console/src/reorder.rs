//! Reorder coordinator: persists a planned ordering and reconciles.
//!
//! Order updates go out one at a time in the new list's index order. The
//! first failure aborts the rest. A reconciling fetch of the test case is
//! attempted whatever happened to the updates.

use std::sync::atomic::{AtomicBool, Ordering};

use testlab_core::reorder::ReorderPlan;
use testlab_core::{TestCase, TestCaseScope};
use thiserror::Error;
use tracing::{info, warn};

use crate::api::TestLabApi;
use crate::client::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("a reorder is already in progress")]
pub struct ReorderInProgress;

/// What happened while persisting a reorder.
#[derive(Debug)]
pub struct ReorderReport {
    /// Updates acknowledged by the server, a prefix of the plan.
    pub applied: usize,
    pub total: usize,
    /// The step whose update failed, with the error.
    pub update_error: Option<(String, ClientError)>,
    /// Authoritative test case after reconciliation, steps sorted.
    pub refreshed: Option<TestCase>,
    pub refresh_error: Option<ClientError>,
}

impl ReorderReport {
    pub fn is_complete(&self) -> bool {
        self.update_error.is_none() && self.applied == self.total
    }
}

/// Runs one reorder at a time.
#[derive(Debug, Default)]
pub struct ReorderCoordinator {
    pending: AtomicBool,
}

/// Clears the pending flag when the reorder ends or is abandoned.
struct PendingGuard<'a>(&'a AtomicBool);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ReorderCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Send every update in `plan` sequentially, then refetch.
    pub async fn apply(
        &self,
        api: &dyn TestLabApi,
        scope: &TestCaseScope,
        plan: &ReorderPlan,
    ) -> Result<ReorderReport, ReorderInProgress> {
        if self
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ReorderInProgress);
        }
        let _guard = PendingGuard(&self.pending);

        let total = plan.updates.len();
        let mut applied = 0;
        let mut update_error = None;

        for update in &plan.updates {
            match api
                .update_test_step_order(scope, &update.step_id, &update.order)
                .await
            {
                Ok(()) => applied += 1,
                Err(error) => {
                    warn!(
                        step_id = %update.step_id,
                        order = %update.order,
                        applied,
                        total,
                        error = %error,
                        "order update failed, aborting remaining updates"
                    );
                    update_error = Some((update.step_id.clone(), error));
                    break;
                }
            }
        }

        let (refreshed, refresh_error) = match api.get_test_case(scope).await {
            Ok(mut test_case) => {
                test_case.sort_steps();
                (Some(test_case), None)
            }
            Err(error) => {
                warn!(error = %error, "reconciling fetch after reorder failed");
                (None, Some(error))
            }
        };

        if update_error.is_none() {
            info!(test_case = %scope, updates = total, "reorder persisted");
        }

        Ok(ReorderReport {
            applied,
            total,
            update_error,
            refreshed,
            refresh_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_case, scope, FakeApi};
    use testlab_core::reorder::{plan_reorder, DropPosition};

    #[tokio::test]
    async fn updates_are_sequential_then_refetched() {
        let api = FakeApi::new(sample_case(3));
        let plan = plan_reorder(&sample_case(3).test_steps, "s1", "s3", DropPosition::After).unwrap();

        let coordinator = ReorderCoordinator::new();
        let report = coordinator.apply(&api, &scope(), &plan).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(
            api.calls(),
            vec![
                "update_order:s2=1",
                "update_order:s3=2",
                "update_order:s1=3",
                "get_case",
            ]
        );
        let refreshed = report.refreshed.unwrap();
        assert_eq!(refreshed.step_ids(), vec!["s2", "s3", "s1"]);
        assert!(!coordinator.is_pending());
    }

    #[tokio::test]
    async fn failure_aborts_remaining_updates_but_still_refetches() {
        let api = FakeApi::new(sample_case(3));
        api.fail_order_update_for("s3");
        let plan = plan_reorder(&sample_case(3).test_steps, "s1", "s3", DropPosition::After).unwrap();

        let report = ReorderCoordinator::new()
            .apply(&api, &scope(), &plan)
            .await
            .unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.total, 3);
        assert_eq!(report.update_error.as_ref().map(|(id, _)| id.as_str()), Some("s3"));
        assert_eq!(api.count_calls("update_order"), 2);
        assert_eq!(api.calls().last().map(String::as_str), Some("get_case"));
        assert!(report.refreshed.is_some());
    }

    #[tokio::test]
    async fn refresh_failure_is_reported() {
        let api = FakeApi::new(sample_case(2));
        api.fail_case_fetch();
        let plan = plan_reorder(&sample_case(2).test_steps, "s2", "s1", DropPosition::Before).unwrap();

        let report = ReorderCoordinator::new()
            .apply(&api, &scope(), &plan)
            .await
            .unwrap();

        assert_eq!(report.applied, 2);
        assert!(report.refreshed.is_none());
        assert!(report.refresh_error.is_some());
    }

    #[tokio::test]
    async fn concurrent_reorder_is_refused() {
        let coordinator = ReorderCoordinator::new();
        coordinator.pending.store(true, Ordering::SeqCst);
        let api = FakeApi::new(sample_case(2));
        let plan = plan_reorder(&sample_case(2).test_steps, "s2", "s1", DropPosition::Before).unwrap();

        let result = coordinator.apply(&api, &scope(), &plan).await;
        assert_eq!(result.err(), Some(ReorderInProgress));
        assert!(api.calls().is_empty());
    }
}
