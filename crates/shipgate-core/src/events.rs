use serde::Serialize;
use tokio::sync::broadcast;

use crate::controller::Phase;
use crate::types::{ActionRun, ItemKind, TestOutcome};

/// Caller-visible transitions published by a story session.
///
/// Each transition is published once; repeated polls that observe the same
/// remote state publish nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    PhaseChanged {
        story_id: String,
        from: Phase,
        to: Phase,
    },
    RunUpdated {
        story_id: String,
        run: ActionRun,
    },
    ChecklistChanged {
        story_id: String,
        can_proceed: bool,
    },
    ItemStarted {
        story_id: String,
        kind: ItemKind,
        item_id: String,
    },
    ItemFinished {
        story_id: String,
        kind: ItemKind,
        outcome: TestOutcome,
    },
}

impl SessionEvent {
    /// The serialized `type` tag, used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::PhaseChanged { .. } => "phase_changed",
            SessionEvent::RunUpdated { .. } => "run_updated",
            SessionEvent::ChecklistChanged { .. } => "checklist_changed",
            SessionEvent::ItemStarted { .. } => "item_started",
            SessionEvent::ItemFinished { .. } => "item_finished",
        }
    }

    pub fn story_id(&self) -> &str {
        match self {
            SessionEvent::PhaseChanged { story_id, .. }
            | SessionEvent::RunUpdated { story_id, .. }
            | SessionEvent::ChecklistChanged { story_id, .. }
            | SessionEvent::ItemStarted { story_id, .. }
            | SessionEvent::ItemFinished { story_id, .. } => story_id,
        }
    }
}

pub type EventSender = broadcast::Sender<SessionEvent>;

/// A sender with no subscribers yet. Sends to it are dropped silently.
pub fn channel() -> EventSender {
    let (tx, _) = broadcast::channel(256);
    tx
}
