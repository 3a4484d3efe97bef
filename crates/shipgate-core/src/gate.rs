//! Readiness gate: decides whether the gated action may start.
//!
//! Both functions are pure over the current model. Nothing is cached, so a
//! toggle is reflected on the very next call.

use crate::checklist::ChecklistModel;
use crate::types::ChecklistItem;

/// True iff every required item is done. Optional items never block, and an
/// empty checklist is vacuously ready.
pub fn can_proceed(model: &ChecklistModel) -> bool {
    model.items().iter().all(|i| !i.required || i.done)
}

/// Required items that are not yet done, in display order. Empty exactly
/// when [`can_proceed`] is true.
pub fn blocking_items(model: &ChecklistModel) -> Vec<&ChecklistItem> {
    model
        .items()
        .iter()
        .filter(|i| i.required && !i.done)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
