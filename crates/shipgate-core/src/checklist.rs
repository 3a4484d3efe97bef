use std::collections::{HashMap, HashSet};

use crate::error::ChecklistError;
use crate::types::{ChecklistItem, ChecklistSnapshot};

// ---------------------------------------------------------------------------
// ChecklistModel
// ---------------------------------------------------------------------------

/// The prerequisite items for one story, in display order.
///
/// Only explicit operator calls mutate the model; nothing on the polling side
/// ever touches it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChecklistModel {
    story_id: String,
    items: Vec<ChecklistItem>,
}

impl ChecklistModel {
    pub fn new(story_id: impl Into<String>) -> Self {
        Self {
            story_id: story_id.into(),
            items: Vec::new(),
        }
    }

    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    pub fn items(&self) -> &[ChecklistItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ChecklistItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Replace the full item set. Called once per story load.
    pub fn initialize(&mut self, items: Vec<ChecklistItem>) -> Result<(), ChecklistError> {
        check_unique(&items)?;
        self.items = items;
        Ok(())
    }

    /// Replace the item set after a re-fetch of the same story, carrying the
    /// operator's `done` marks over for every id present before and after.
    pub fn reload(&mut self, items: Vec<ChecklistItem>) -> Result<(), ChecklistError> {
        check_unique(&items)?;
        let previous: HashMap<&str, bool> = self
            .items
            .iter()
            .map(|i| (i.id.as_str(), i.done))
            .collect();
        let merged = items
            .into_iter()
            .map(|mut item| {
                if let Some(done) = previous.get(item.id.as_str()) {
                    item.done = *done;
                }
                item
            })
            .collect();
        self.items = merged;
        Ok(())
    }

    /// Flip `done` for one item. Unknown ids are ignored; returns whether an
    /// item changed.
    pub fn toggle(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                item.done = !item.done;
                true
            }
            None => false,
        }
    }

    /// Set `done` explicitly. Returns whether the value actually changed.
    pub fn set_done(&mut self, id: &str, done: bool) -> bool {
        match self.items.iter_mut().find(|i| i.id == id) {
            Some(item) if item.done != done => {
                item.done = done;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> ChecklistSnapshot {
        self.items.iter().map(|i| (i.id.clone(), i.done)).collect()
    }

    /// `(done, total)` across all items, required or not.
    pub fn progress(&self) -> (usize, usize) {
        let done = self.items.iter().filter(|i| i.done).count();
        (done, self.items.len())
    }
}

fn check_unique(items: &[ChecklistItem]) -> Result<(), ChecklistError> {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.id.as_str()) {
            return Err(ChecklistError::DuplicateItem(item.id.clone()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ChecklistModel {
        let mut m = ChecklistModel::new("US-101");
        m.initialize(vec![
            ChecklistItem::new("a", "Feature flag ready", true),
            ChecklistItem::new("b", "Dashboards updated", false),
        ])
        .unwrap();
        m
    }

    #[test]
    fn toggle_flips_and_unknown_is_noop() {
        let mut m = model();
        assert!(m.toggle("a"));
        assert!(m.get("a").unwrap().done);
        assert!(m.toggle("a"));
        assert!(!m.get("a").unwrap().done);

        let before = m.clone();
        assert!(!m.toggle("zzz"));
        assert_eq!(m, before);
    }

    #[test]
    fn initialize_rejects_duplicate_ids() {
        let mut m = ChecklistModel::new("US-101");
        let err = m
            .initialize(vec![
                ChecklistItem::new("a", "one", true),
                ChecklistItem::new("a", "two", false),
            ])
            .unwrap_err();
        assert_eq!(err, ChecklistError::DuplicateItem("a".into()));
        assert!(m.is_empty());
    }

    #[test]
    fn initialize_discards_previous_marks() {
        let mut m = model();
        m.toggle("a");
        m.initialize(vec![ChecklistItem::new("a", "Feature flag ready", true)])
            .unwrap();
        assert!(!m.get("a").unwrap().done);
    }

    #[test]
    fn reload_keeps_marks_for_stable_ids() {
        let mut m = model();
        m.toggle("a");
        m.toggle("b");
        m.reload(vec![
            ChecklistItem::new("a", "Feature flag ready (renamed)", true),
            ChecklistItem::new("c", "New item", true),
        ])
        .unwrap();
        assert!(m.get("a").unwrap().done);
        assert_eq!(m.get("a").unwrap().label, "Feature flag ready (renamed)");
        assert!(!m.get("c").unwrap().done);
        assert!(m.get("b").is_none());
    }

    #[test]
    fn set_done_reports_change_only_once() {
        let mut m = model();
        assert!(m.set_done("b", true));
        assert!(!m.set_done("b", true));
        assert!(!m.set_done("missing", true));
    }

    #[test]
    fn snapshot_is_detached_copy() {
        let mut m = model();
        let snap = m.snapshot();
        m.toggle("a");
        assert_eq!(snap.get("a"), Some(&false));
        assert_eq!(m.snapshot().get("a"), Some(&true));
    }

    #[test]
    fn progress_counts_all_items() {
        let mut m = model();
        assert_eq!(m.progress(), (0, 2));
        m.toggle("b");
        assert_eq!(m.progress(), (1, 2));
    }
}
