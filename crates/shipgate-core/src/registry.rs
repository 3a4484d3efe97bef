//! Per-item test and validation runs for one story.
//!
//! At most one invocation per `(kind, item)` is in flight; independent items
//! run concurrently. Only the latest outcome per item is kept.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::events::{EventSender, SessionEvent};
use crate::service::ItemRunner;
use crate::story::TestItem;
use crate::types::{ItemKind, TestOutcome, TestStatus};

// ---------------------------------------------------------------------------
// Public views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ItemKey {
    pub kind: ItemKind,
    pub item_id: String,
}

impl ItemKey {
    pub fn new(kind: ItemKind, item_id: impl Into<String>) -> Self {
        Self {
            kind,
            item_id: item_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemState {
    pub kind: ItemKind,
    pub item_id: String,
    /// Case text or risk title, when the item came from an upstream plan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub running: bool,
    pub outcome: Option<TestOutcome>,
}

/// Totals across every tracked item. Items never run count toward `total`
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ResultsSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub running: usize,
    pub total: usize,
    /// Percentage of `total` that passed, rounded; 0 when nothing is tracked.
    pub success_rate: u32,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct InFlight {
    generation: u64,
    abort: Option<AbortHandle>,
}

impl InFlight {
    /// The task finished by itself; forget the handle without aborting.
    fn settle(mut self) {
        self.abort.take();
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

#[derive(Default)]
struct Entry {
    label: Option<String>,
    outcome: Option<TestOutcome>,
    in_flight: Option<InFlight>,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<ItemKey, Entry>,
    next_generation: u64,
    torn_down: bool,
}

struct Shared {
    story_id: String,
    events: EventSender,
    inner: Mutex<Inner>,
}

impl Shared {
    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ---------------------------------------------------------------------------
// TestRunRegistry
// ---------------------------------------------------------------------------

pub struct TestRunRegistry {
    shared: Arc<Shared>,
    runner: Arc<dyn ItemRunner>,
}

impl TestRunRegistry {
    pub fn new(story_id: impl Into<String>, runner: Arc<dyn ItemRunner>, events: EventSender) -> Self {
        Self {
            shared: Arc::new(Shared {
                story_id: story_id.into(),
                events,
                inner: Mutex::new(Inner::default()),
            }),
            runner,
        }
    }

    pub fn story_id(&self) -> &str {
        &self.shared.story_id
    }

    /// Track items that have not run yet so they show up in snapshots and
    /// in the summary total. Re-registering an item only updates its label.
    pub async fn register<I>(&self, items: I)
    where
        I: IntoIterator<Item = TestItem>,
    {
        let mut inner = self.shared.inner.lock().await;
        for item in items {
            let entry = inner.entries.entry(ItemKey::new(item.kind, item.id)).or_default();
            entry.label = Some(item.label);
        }
    }

    /// Start one item. Rejected while the same item is still running.
    ///
    /// The returned handle resolves to the outcome once it has been recorded,
    /// or to `None` if the registry was torn down first.
    pub async fn run(
        &self,
        kind: ItemKind,
        item_id: &str,
    ) -> Result<JoinHandle<Option<TestOutcome>>, RegistryError> {
        let key = ItemKey::new(kind, item_id);
        let mut inner = self.shared.inner.lock().await;
        if inner.torn_down {
            return Err(RegistryError::TornDown(self.shared.story_id.clone()));
        }
        if inner
            .entries
            .get(&key)
            .is_some_and(|e| e.in_flight.is_some())
        {
            return Err(RegistryError::AlreadyRunning {
                item: format!("{kind}/{item_id}"),
            });
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        let entry = inner.entries.entry(key.clone()).or_default();
        let handle = tokio::spawn(run_item(
            Arc::downgrade(&self.shared),
            self.runner.clone(),
            key,
            entry.label.clone(),
            generation,
        ));
        entry.in_flight = Some(InFlight {
            generation,
            abort: Some(handle.abort_handle()),
        });

        info!(story = %self.shared.story_id, %kind, item = item_id, "item run started");
        self.shared.publish(SessionEvent::ItemStarted {
            story_id: self.shared.story_id.clone(),
            kind,
            item_id: item_id.to_string(),
        });
        Ok(handle)
    }

    pub async fn is_running(&self, kind: ItemKind, item_id: &str) -> bool {
        let inner = self.shared.inner.lock().await;
        inner
            .entries
            .get(&ItemKey::new(kind, item_id))
            .is_some_and(|e| e.in_flight.is_some())
    }

    pub async fn outcome(&self, kind: ItemKind, item_id: &str) -> Option<TestOutcome> {
        let inner = self.shared.inner.lock().await;
        inner
            .entries
            .get(&ItemKey::new(kind, item_id))
            .and_then(|e| e.outcome.clone())
    }

    pub async fn snapshot(&self) -> Vec<ItemState> {
        let inner = self.shared.inner.lock().await;
        inner
            .entries
            .iter()
            .map(|(key, entry)| ItemState {
                kind: key.kind,
                item_id: key.item_id.clone(),
                label: entry.label.clone(),
                running: entry.in_flight.is_some(),
                outcome: entry.outcome.clone(),
            })
            .collect()
    }

    pub async fn summary(&self) -> ResultsSummary {
        let inner = self.shared.inner.lock().await;
        summarize(inner.entries.values())
    }

    /// Abort every in-flight run and refuse new ones. Recorded outcomes stay
    /// readable. Idempotent.
    pub async fn teardown(&self) {
        let mut inner = self.shared.inner.lock().await;
        if inner.torn_down {
            return;
        }
        inner.torn_down = true;
        let mut aborted = 0;
        for entry in inner.entries.values_mut() {
            if entry.in_flight.take().is_some() {
                aborted += 1;
            }
        }
        info!(story = %self.shared.story_id, aborted, "test registry torn down");
    }
}

fn summarize<'a>(entries: impl Iterator<Item = &'a Entry>) -> ResultsSummary {
    let mut s = ResultsSummary::default();
    for entry in entries {
        s.total += 1;
        if entry.in_flight.is_some() {
            s.running += 1;
            continue;
        }
        match entry.outcome.as_ref().map(|o| o.status) {
            Some(TestStatus::Passed) => s.passed += 1,
            Some(TestStatus::Failed) => s.failed += 1,
            Some(TestStatus::Skipped) => s.skipped += 1,
            Some(TestStatus::Running) => s.running += 1,
            Some(TestStatus::Pending) | None => {}
        }
    }
    if s.total > 0 {
        let rate = (s.passed as f64 / s.total as f64 * 100.0).round();
        s.success_rate = rate as u32;
    }
    s
}

async fn run_item(
    weak: Weak<Shared>,
    runner: Arc<dyn ItemRunner>,
    key: ItemKey,
    label: Option<String>,
    generation: u64,
) -> Option<TestOutcome> {
    let story_id = weak.upgrade()?.story_id.clone();
    let outcome = match runner
        .run_item(&story_id, key.kind, &key.item_id, label.as_deref())
        .await
    {
        Ok(mut outcome) => {
            // The upstream may echo a different name; the registry key wins.
            outcome.item_id = key.item_id.clone();
            outcome
        }
        Err(e) => {
            warn!(story = %story_id, kind = %key.kind, item = %key.item_id, error = %e, "item run failed");
            TestOutcome::failed(key.item_id.clone(), e.to_string())
        }
    };

    let shared = weak.upgrade()?;
    let mut inner = shared.inner.lock().await;
    if inner.torn_down {
        return None;
    }
    let entry = inner.entries.get_mut(&key)?;
    match entry.in_flight.take() {
        Some(flight) if flight.generation == generation => flight.settle(),
        other => {
            entry.in_flight = other;
            debug!(story = %story_id, item = %key.item_id, "discarding stale item result");
            return None;
        }
    }
    entry.outcome = Some(outcome.clone());
    info!(story = %story_id, kind = %key.kind, item = %key.item_id, status = %outcome.status, "item run finished");
    shared.publish(SessionEvent::ItemFinished {
        story_id: story_id.clone(),
        kind: key.kind,
        outcome: outcome.clone(),
    });
    Some(outcome)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
