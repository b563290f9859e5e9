//! Reorder planning for drag-and-drop step moves.
//!
//! Planning is pure: it produces the new ordered list and the per-step order
//! updates to persist. Sending the updates is the console's job.

use thiserror::Error;

use crate::types::TestStep;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReorderError {
    #[error("cannot move a step onto itself")]
    SameStep,
    #[error("step not found: {0}")]
    UnknownStep(String),
}

/// Where the dragged step lands relative to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPosition {
    Before,
    After,
}

impl DropPosition {
    /// Drop intent implied by drag direction: dragging down lands after the
    /// target, dragging up lands before it.
    pub fn inferred(source_index: usize, target_index: usize) -> Self {
        if source_index < target_index {
            Self::After
        } else {
            Self::Before
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

/// One persisted position assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdate {
    pub step_id: String,
    /// 1-based position, string-encoded as the API expects.
    pub order: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReorderPlan {
    pub steps: Vec<TestStep>,
    pub updates: Vec<OrderUpdate>,
}

impl ReorderPlan {
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step_id.as_str()).collect()
    }
}

/// Move `source` next to `target` and assign contiguous positions.
///
/// The returned updates cover every step, in the new list's index order.
pub fn plan_reorder(
    steps: &[TestStep],
    source: &str,
    target: &str,
    position: DropPosition,
) -> Result<ReorderPlan, ReorderError> {
    if source == target {
        return Err(ReorderError::SameStep);
    }

    let source_index = steps
        .iter()
        .position(|s| s.step_id == source)
        .ok_or_else(|| ReorderError::UnknownStep(source.to_string()))?;
    if !steps.iter().any(|s| s.step_id == target) {
        return Err(ReorderError::UnknownStep(target.to_string()));
    }

    let mut reordered = steps.to_vec();
    let moved = reordered.remove(source_index);

    // Target index is looked up again after removal.
    let target_index = reordered
        .iter()
        .position(|s| s.step_id == target)
        .ok_or_else(|| ReorderError::UnknownStep(target.to_string()))?;
    let insert_at = match position {
        DropPosition::Before => target_index,
        DropPosition::After => target_index + 1,
    };
    reordered.insert(insert_at, moved);

    let mut updates = Vec::with_capacity(reordered.len());
    for (index, step) in reordered.iter_mut().enumerate() {
        let order = (index + 1).to_string();
        step.order = Some(order.clone());
        updates.push(OrderUpdate {
            step_id: step.step_id.clone(),
            order,
        });
    }

    Ok(ReorderPlan {
        steps: reordered,
        updates,
    })
}
