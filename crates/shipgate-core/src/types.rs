use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ShipgateError;

// ---------------------------------------------------------------------------
// ChecklistItem
// ---------------------------------------------------------------------------

/// One prerequisite condition gating an action.
///
/// `id` must be stable across re-fetches of the same story; ordering is only
/// for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub done: bool,
}

impl ChecklistItem {
    pub fn new(id: impl Into<String>, label: impl Into<String>, required: bool) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            required,
            done: false,
        }
    }
}

/// Immutable `id → done` view of a checklist, as submitted upstream.
pub type ChecklistSnapshot = BTreeMap<String, bool>;

// ---------------------------------------------------------------------------
// RunHandle
// ---------------------------------------------------------------------------

/// Opaque identifier the action service hands back for a submitted run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunHandle(String);

impl RunHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::InProgress => "in_progress",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = ShipgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunState::Pending),
            "in_progress" => Ok(RunState::InProgress),
            "completed" => Ok(RunState::Completed),
            "failed" => Ok(RunState::Failed),
            _ => Err(ShipgateError::InvalidValue {
                kind: "run state",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionRequest
// ---------------------------------------------------------------------------

/// The record sent to the action executor. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub story_id: String,
    pub checklist_snapshot: ChecklistSnapshot,
    pub submitted_at: DateTime<Utc>,
}

impl ActionRequest {
    pub fn new(story_id: impl Into<String>, checklist_snapshot: ChecklistSnapshot) -> Self {
        Self {
            story_id: story_id.into(),
            checklist_snapshot,
            submitted_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionRun
// ---------------------------------------------------------------------------

/// One execution attempt of the gated action.
///
/// A run in `InProgress` always has `started_at` and never a `result`. Once
/// `Completed` or `Failed` the run never changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRun {
    pub id: RunHandle,
    pub story_id: String,
    pub state: RunState,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionRun {
    /// A freshly acknowledged run: the upstream has begun executing it.
    pub fn started(id: RunHandle, story_id: impl Into<String>) -> Self {
        Self {
            id,
            story_id: story_id.into(),
            state: RunState::InProgress,
            started_at: Some(Utc::now()),
            last_polled_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether `other` reports the same remote state as `self`, ignoring
    /// bookkeeping timestamps.
    pub fn same_observation(&self, other: &ActionRun) -> bool {
        self.state == other.state && self.result == other.result && self.error == other.error
    }
}

// ---------------------------------------------------------------------------
// TestOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Pending => "pending",
            TestStatus::Running => "running",
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest observed result of one test or validation item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub item_id: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestOutcome {
    pub fn failed(item_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            status: TestStatus::Failed,
            message: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// ItemKind
// ---------------------------------------------------------------------------

/// Which family a runnable item belongs to. Migration risks are validated
/// through a different upstream operation than test and edge cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    TestCase,
    EdgeCase,
    MigrationRisk,
}

impl ItemKind {
    pub fn all() -> &'static [ItemKind] {
        &[ItemKind::TestCase, ItemKind::EdgeCase, ItemKind::MigrationRisk]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::TestCase => "test_case",
            ItemKind::EdgeCase => "edge_case",
            ItemKind::MigrationRisk => "migration_risk",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = ShipgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test_case" | "test-case" => Ok(ItemKind::TestCase),
            "edge_case" | "edge-case" => Ok(ItemKind::EdgeCase),
            "migration_risk" | "migration-risk" => Ok(ItemKind::MigrationRisk),
            _ => Err(ShipgateError::InvalidValue {
                kind: "item kind",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_terminality() {
        assert!(!RunState::Pending.is_terminal());
        assert!(!RunState::InProgress.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }

    #[test]
    fn run_state_wire_names_match_upstream() {
        let json = serde_json::to_string(&RunState::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        assert_eq!("completed".parse::<RunState>().unwrap(), RunState::Completed);
        assert!("done".parse::<RunState>().is_err());
    }

    #[test]
    fn started_run_has_start_time_and_no_result() {
        let run = ActionRun::started(RunHandle::new("r1"), "US-101");
        assert_eq!(run.state, RunState::InProgress);
        assert!(run.started_at.is_some());
        assert!(run.result.is_none());
    }

    #[test]
    fn same_observation_ignores_poll_timestamp() {
        let a = ActionRun::started(RunHandle::new("r1"), "US-101");
        let mut b = a.clone();
        b.last_polled_at = Some(Utc::now());
        assert!(a.same_observation(&b));
        b.state = RunState::Completed;
        assert!(!a.same_observation(&b));
    }

    #[test]
    fn run_handle_serializes_as_bare_string() {
        let json = serde_json::to_string(&RunHandle::new("run-42")).unwrap();
        assert_eq!(json, "\"run-42\"");
    }

    #[test]
    fn item_kind_accepts_kebab_and_snake() {
        assert_eq!("edge-case".parse::<ItemKind>().unwrap(), ItemKind::EdgeCase);
        assert_eq!(
            "migration_risk".parse::<ItemKind>().unwrap(),
            ItemKind::MigrationRisk
        );
        assert!("smoke".parse::<ItemKind>().is_err());
    }

    #[test]
    fn checklist_item_defaults_flags() {
        let item: ChecklistItem = serde_json::from_str(r#"{"id":"a","label":"A"}"#).unwrap();
        assert!(!item.required);
        assert!(!item.done);
    }
}
