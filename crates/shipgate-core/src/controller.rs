//! Deployment controller: the readiness-gated state machine for one story.
//!
//! ```text
//! Idle → Gated ⇄ Ready → Submitting → InProgress → Completed | Failed
//!                  ▲          │                         │
//!                  └──────────┘ (submit error)          └─ rearm() → Gated | Ready
//! ```
//!
//! All transitions for a story are applied under one lock. The submit call and
//! every status round trip happen outside it; their results are applied only
//! if the controller is still on the same run (epoch) and not torn down.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::checklist::ChecklistModel;
use crate::error::{ControllerError, SubmitError};
use crate::events::{EventSender, SessionEvent};
use crate::gate;
use crate::poll::{CancelFlag, PollFailure, PollOutcome, PollPolicy, PollTask, StatusPoller};
use crate::service::{ActionExecutor, StatusSource};
use crate::types::{ActionRequest, ActionRun, ChecklistItem, RunHandle, RunState};

/// Error recorded on a run the remote marked failed without saying why.
const REMOTE_FAILURE: &str = "remote reported failure";

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Gated,
    Ready,
    Submitting,
    InProgress,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Gated => "gated",
            Phase::Ready => "ready",
            Phase::Submitting => "submitting",
            Phase::InProgress => "in_progress",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// A run is being submitted or is executing remotely.
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Submitting | Phase::InProgress)
    }

    /// Phases that follow the gate on every checklist change.
    fn tracks_gate(self) -> bool {
        matches!(self, Phase::Idle | Phase::Gated | Phase::Ready)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DeploymentView
// ---------------------------------------------------------------------------

/// Read-only snapshot of a controller, as served to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentView {
    pub story_id: String,
    pub phase: Phase,
    pub checklist: Vec<ChecklistItem>,
    pub can_proceed: bool,
    pub blocking: Vec<String>,
    pub current_run: Option<ActionRun>,
    pub history: Vec<ActionRun>,
    pub last_error: Option<String>,
    pub last_poll_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct State {
    phase: Phase,
    checklist: ChecklistModel,
    current_run: Option<ActionRun>,
    history: Vec<ActionRun>,
    last_error: Option<String>,
    last_poll_error: Option<String>,
    /// Bumped on every start and on teardown; stale work compares against it.
    epoch: u64,
    poll_task: Option<PollTask>,
    torn_down: bool,
}

struct Shared {
    story_id: String,
    executor: Arc<dyn ActionExecutor>,
    status: Arc<dyn StatusSource>,
    policy: PollPolicy,
    events: EventSender,
    state: Mutex<State>,
}

impl Shared {
    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_phase(&self, st: &mut State, to: Phase) {
        let from = st.phase;
        if from == to {
            return;
        }
        st.phase = to;
        info!(story = %self.story_id, %from, %to, "deployment phase changed");
        self.publish(SessionEvent::PhaseChanged {
            story_id: self.story_id.clone(),
            from,
            to,
        });
    }

    fn gate_phase(st: &State) -> Phase {
        if gate::can_proceed(&st.checklist) {
            Phase::Ready
        } else {
            Phase::Gated
        }
    }

    /// Publish the checklist change and let gate-tracking phases follow it.
    fn checklist_changed(&self, st: &mut State) {
        let can_proceed = gate::can_proceed(&st.checklist);
        self.publish(SessionEvent::ChecklistChanged {
            story_id: self.story_id.clone(),
            can_proceed,
        });
        if st.phase.tracks_gate() {
            let next = Self::gate_phase(st);
            self.set_phase(st, next);
        }
    }

    fn publish_run(&self, run: &ActionRun) {
        self.publish(SessionEvent::RunUpdated {
            story_id: self.story_id.clone(),
            run: run.clone(),
        });
    }

    /// Apply the outcome of a submit started at `epoch`.
    async fn finish_submit(
        self: Arc<Self>,
        epoch: u64,
        result: Result<RunHandle, SubmitError>,
    ) -> Result<RunHandle, ControllerError> {
        let mut st = self.state.lock().await;
        if st.torn_down || st.epoch != epoch {
            if let Ok(handle) = &result {
                warn!(story = %self.story_id, run_id = %handle, "dropping acknowledgement for abandoned submit");
            }
            return Err(ControllerError::TornDown(self.story_id.clone()));
        }

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                warn!(story = %self.story_id, error = %e, "submit failed");
                st.last_error = Some(e.to_string());
                let next = Self::gate_phase(&st);
                self.set_phase(&mut st, next);
                return Err(e.into());
            }
        };

        let run = ActionRun::started(handle.clone(), self.story_id.clone());
        self.publish_run(&run);
        st.current_run = Some(run.clone());
        self.set_phase(&mut st, Phase::InProgress);
        info!(story = %self.story_id, run_id = %handle, "deployment started");

        let poller = StatusPoller::new(
            self.status.clone(),
            self.story_id.clone(),
            handle.clone(),
            self.policy.clone(),
        )
        .with_baseline(run);
        let weak = Arc::downgrade(&self);
        st.poll_task = Some(PollTask::spawn(move |flag| {
            poll_loop(weak, epoch, flag, poller)
        }));
        Ok(handle)
    }
}

/// Drive `poller` until the run is terminal, the budget is spent, or the
/// controller moves on.
async fn poll_loop(weak: Weak<Shared>, epoch: u64, flag: CancelFlag, mut poller: StatusPoller) {
    loop {
        tokio::time::sleep(poller.next_delay()).await;
        if flag.is_cancelled() {
            return;
        }
        let outcome = poller.poll().await;

        let Some(shared) = weak.upgrade() else {
            return;
        };
        let mut st = shared.state.lock().await;
        if flag.is_cancelled() || st.torn_down || st.epoch != epoch {
            return;
        }

        match outcome {
            Ok(PollOutcome::Changed(observed)) => {
                st.last_poll_error = None;
                let run = merge_observation(st.current_run.as_ref(), observed);
                shared.publish_run(&run);
                let terminal = run.state;
                st.current_run = Some(run);
                match terminal {
                    RunState::Completed => {
                        info!(story = %shared.story_id, run_id = %poller.handle(), "deployment completed");
                        shared.set_phase(&mut st, Phase::Completed);
                    }
                    RunState::Failed => {
                        error!(story = %shared.story_id, run_id = %poller.handle(), "deployment failed remotely");
                        shared.set_phase(&mut st, Phase::Failed);
                    }
                    RunState::Pending | RunState::InProgress => continue,
                }
                if let Some(task) = st.poll_task.take() {
                    task.detach();
                }
                return;
            }
            Ok(PollOutcome::Unchanged { polled_at }) => {
                st.last_poll_error = None;
                if let Some(run) = st.current_run.as_mut() {
                    run.last_polled_at = Some(polled_at);
                }
            }
            Ok(PollOutcome::Finished(_)) => return,
            Err(PollFailure::Transient(e)) => {
                warn!(story = %shared.story_id, run_id = %poller.handle(), attempts = poller.attempts(), error = %e, "status poll failed");
                st.last_poll_error = Some(e.to_string());
            }
            Err(PollFailure::TimedOut(e)) => {
                error!(story = %shared.story_id, run_id = %poller.handle(), error = %e, "deployment timed out");
                if let Some(run) = st.current_run.as_mut() {
                    run.state = RunState::Failed;
                    run.result = None;
                    run.error = Some(e.to_string());
                }
                if let Some(run) = st.current_run.clone() {
                    shared.publish_run(&run);
                }
                shared.set_phase(&mut st, Phase::Failed);
                if let Some(task) = st.poll_task.take() {
                    task.detach();
                }
                return;
            }
        }
    }
}

/// Fold a remote observation into the locally owned run. Identity and start
/// time stay local; state, result and error follow the remote.
fn merge_observation(current: Option<&ActionRun>, observed: ActionRun) -> ActionRun {
    let mut run = match current {
        Some(current) => ActionRun {
            id: current.id.clone(),
            story_id: current.story_id.clone(),
            started_at: current.started_at.or(observed.started_at),
            ..observed
        },
        None => observed,
    };
    match run.state {
        RunState::Pending | RunState::InProgress => run.result = None,
        RunState::Failed if run.error.is_none() => run.error = Some(REMOTE_FAILURE.to_string()),
        RunState::Failed | RunState::Completed => {}
    }
    run
}

// ---------------------------------------------------------------------------
// DeploymentController
// ---------------------------------------------------------------------------

/// Owns the checklist, the current run and its poll task for one story.
///
/// Dropping the controller cancels its poll task.
pub struct DeploymentController {
    shared: Arc<Shared>,
}

impl DeploymentController {
    pub fn new(
        story_id: impl Into<String>,
        executor: Arc<dyn ActionExecutor>,
        status: Arc<dyn StatusSource>,
        policy: PollPolicy,
        events: EventSender,
    ) -> Self {
        let story_id = story_id.into();
        let state = State {
            phase: Phase::Idle,
            checklist: ChecklistModel::new(story_id.clone()),
            current_run: None,
            history: Vec::new(),
            last_error: None,
            last_poll_error: None,
            epoch: 0,
            poll_task: None,
            torn_down: false,
        };
        Self {
            shared: Arc::new(Shared {
                story_id,
                executor,
                status,
                policy,
                events,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn story_id(&self) -> &str {
        &self.shared.story_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub async fn phase(&self) -> Phase {
        self.shared.state.lock().await.phase
    }

    /// Replace the checklist. Leaves `Idle` for `Gated` or `Ready`.
    pub async fn initialize_checklist(
        &self,
        items: Vec<ChecklistItem>,
    ) -> Result<(), ControllerError> {
        let mut st = self.lock_live().await?;
        st.checklist.initialize(items)?;
        self.shared.checklist_changed(&mut st);
        Ok(())
    }

    /// Replace the checklist after a re-fetch, keeping `done` marks by id.
    pub async fn reload_checklist(&self, items: Vec<ChecklistItem>) -> Result<(), ControllerError> {
        let mut st = self.lock_live().await?;
        st.checklist.reload(items)?;
        self.shared.checklist_changed(&mut st);
        Ok(())
    }

    /// Flip one item. Unknown ids are a no-op; returns whether anything changed.
    pub async fn toggle(&self, item_id: &str) -> Result<bool, ControllerError> {
        let mut st = self.lock_live().await?;
        let changed = st.checklist.toggle(item_id);
        if changed {
            self.shared.checklist_changed(&mut st);
        }
        Ok(changed)
    }

    pub async fn set_done(&self, item_id: &str, done: bool) -> Result<bool, ControllerError> {
        let mut st = self.lock_live().await?;
        let changed = st.checklist.set_done(item_id, done);
        if changed {
            self.shared.checklist_changed(&mut st);
        }
        Ok(changed)
    }

    /// Submit the gated action and begin polling it.
    ///
    /// Fails with `Conflict` while a run is submitting or in progress, with
    /// `GateClosed` while required items are open, and with `InvalidState`
    /// from a terminal phase until [`rearm`](Self::rearm) is called. A
    /// submit failure is recorded in `last_error` and returns the controller
    /// to the gate.
    pub async fn start(&self) -> Result<RunHandle, ControllerError> {
        let shared = &self.shared;
        let (request, epoch) = {
            let mut st = self.lock_live().await?;
            match st.phase {
                Phase::Submitting | Phase::InProgress => {
                    return Err(ControllerError::Conflict {
                        story: shared.story_id.clone(),
                        phase: st.phase.to_string(),
                    });
                }
                Phase::Idle | Phase::Completed | Phase::Failed => {
                    return Err(ControllerError::InvalidState {
                        action: "start".to_string(),
                        phase: st.phase.to_string(),
                    });
                }
                Phase::Gated | Phase::Ready => {}
            }
            let blocking: Vec<String> = gate::blocking_items(&st.checklist)
                .into_iter()
                .map(|i| i.id.clone())
                .collect();
            if !blocking.is_empty() {
                return Err(ControllerError::GateClosed { blocking });
            }

            st.last_error = None;
            st.epoch += 1;
            shared.set_phase(&mut st, Phase::Submitting);
            let request = ActionRequest::new(shared.story_id.clone(), st.checklist.snapshot());
            (request, st.epoch)
        };

        info!(story = %shared.story_id, "submitting deployment");
        // Submit and apply on a detached task so a dropped caller cannot
        // strand the controller in Submitting.
        let task_shared = shared.clone();
        let submit = tokio::spawn(async move {
            let result = task_shared.executor.submit(&request).await;
            task_shared.finish_submit(epoch, result).await
        });
        match submit.await {
            Ok(result) => result,
            Err(e) => {
                error!(story = %shared.story_id, error = %e, "submit task aborted");
                Err(ControllerError::TornDown(shared.story_id.clone()))
            }
        }
    }

    /// Leave a terminal phase: archive the finished run and return to the
    /// gate so a new run can be started.
    pub async fn rearm(&self) -> Result<Phase, ControllerError> {
        let mut st = self.lock_live().await?;
        if !st.phase.is_terminal() {
            return Err(ControllerError::InvalidState {
                action: "rearm".to_string(),
                phase: st.phase.to_string(),
            });
        }
        if let Some(run) = st.current_run.take() {
            st.history.push(run);
        }
        st.last_error = None;
        st.last_poll_error = None;
        let next = Shared::gate_phase(&st);
        self.shared.set_phase(&mut st, next);
        Ok(next)
    }

    pub async fn snapshot(&self) -> DeploymentView {
        let st = self.shared.state.lock().await;
        DeploymentView {
            story_id: self.shared.story_id.clone(),
            phase: st.phase,
            checklist: st.checklist.items().to_vec(),
            can_proceed: gate::can_proceed(&st.checklist),
            blocking: gate::blocking_items(&st.checklist)
                .into_iter()
                .map(|i| i.id.clone())
                .collect(),
            current_run: st.current_run.clone(),
            history: st.history.clone(),
            last_error: st.last_error.clone(),
            last_poll_error: st.last_poll_error.clone(),
        }
    }

    /// Stop polling and refuse all further mutation. Results that arrive
    /// afterwards are discarded. Idempotent.
    pub async fn teardown(&self) {
        let mut st = self.shared.state.lock().await;
        if st.torn_down {
            return;
        }
        st.torn_down = true;
        st.epoch += 1;
        if let Some(mut task) = st.poll_task.take() {
            task.cancel();
        }
        info!(story = %self.shared.story_id, phase = %st.phase, "deployment controller torn down");
    }

    async fn lock_live(&self) -> Result<tokio::sync::MutexGuard<'_, State>, ControllerError> {
        let st = self.shared.state.lock().await;
        if st.torn_down {
            return Err(ControllerError::TornDown(self.shared.story_id.clone()));
        }
        Ok(st)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PollError;
    use crate::events;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeUpstream {
        submits: std::sync::Mutex<VecDeque<Result<RunHandle, SubmitError>>>,
        statuses: std::sync::Mutex<VecDeque<Result<RunState, PollError>>>,
        submit_calls: AtomicU32,
        status_calls: AtomicU32,
        hold_submit: Option<Arc<Notify>>,
    }

    impl FakeUpstream {
        fn accepting(statuses: Vec<Result<RunState, PollError>>) -> Self {
            Self {
                statuses: std::sync::Mutex::new(statuses.into()),
                ..Self::default()
            }
        }

        fn rejecting(err: SubmitError) -> Self {
            Self {
                submits: std::sync::Mutex::new(vec![Err(err)].into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ActionExecutor for FakeUpstream {
        async fn submit(&self, request: &ActionRequest) -> Result<RunHandle, SubmitError> {
            let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(hold) = &self.hold_submit {
                hold.notified().await;
            }
            let scripted = self.submits.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(RunHandle::new(format!("{}-run-{n}", request.story_id))))
        }
    }

    #[async_trait]
    impl StatusSource for FakeUpstream {
        async fn action_status(
            &self,
            story_id: &str,
            handle: &RunHandle,
        ) -> Result<ActionRun, PollError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let state = self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(RunState::InProgress))?;
            let mut run = ActionRun::started(handle.clone(), story_id);
            run.state = state;
            if state == RunState::Completed {
                run.result = Some(serde_json::json!({"deployed": true}));
            }
            Ok(run)
        }
    }

    fn controller(upstream: Arc<FakeUpstream>) -> DeploymentController {
        DeploymentController::new(
            "US-101",
            upstream.clone(),
            upstream,
            PollPolicy::fixed(Duration::from_millis(100), 10),
            events::channel(),
        )
    }

    fn items() -> Vec<ChecklistItem> {
        vec![
            ChecklistItem::new("a", "Feature flag created", true),
            ChecklistItem::new("b", "Dashboards updated", false),
        ]
    }

    async fn ready(upstream: Arc<FakeUpstream>) -> DeploymentController {
        let c = controller(upstream);
        c.initialize_checklist(items()).await.unwrap();
        c.toggle("a").await.unwrap();
        assert_eq!(c.phase().await, Phase::Ready);
        c
    }

    async fn wait_for(c: &DeploymentController, phase: Phase) {
        for _ in 0..200 {
            if c.phase().await == phase {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("never reached {phase}, stuck in {}", c.phase().await);
    }

    #[tokio::test]
    async fn checklist_drives_gate_phases() {
        let c = controller(Arc::new(FakeUpstream::default()));
        assert_eq!(c.phase().await, Phase::Idle);

        c.initialize_checklist(items()).await.unwrap();
        assert_eq!(c.phase().await, Phase::Gated);

        c.toggle("a").await.unwrap();
        assert_eq!(c.phase().await, Phase::Ready);
        c.toggle("b").await.unwrap();
        assert_eq!(c.phase().await, Phase::Ready);
        assert!(!c.toggle("nope").await.unwrap());

        c.set_done("a", false).await.unwrap();
        assert_eq!(c.phase().await, Phase::Gated);
    }

    #[tokio::test]
    async fn empty_checklist_is_ready() {
        let c = controller(Arc::new(FakeUpstream::default()));
        c.initialize_checklist(vec![]).await.unwrap();
        assert_eq!(c.phase().await, Phase::Ready);
    }

    #[tokio::test]
    async fn start_refused_while_gated() {
        let upstream = Arc::new(FakeUpstream::default());
        let c = controller(upstream.clone());
        c.initialize_checklist(items()).await.unwrap();

        let err = c.start().await.unwrap_err();
        assert_eq!(
            err,
            ControllerError::GateClosed {
                blocking: vec!["a".into()]
            }
        );
        assert_eq!(upstream.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_refused_before_checklist_loaded() {
        let c = controller(Arc::new(FakeUpstream::default()));
        assert!(matches!(
            c.start().await,
            Err(ControllerError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn submit_conflict_returns_to_ready_without_run() {
        let upstream = Arc::new(FakeUpstream::rejecting(SubmitError::Conflict(
            "run-9 active".into(),
        )));
        let c = ready(upstream).await;

        let err = c.start().await.unwrap_err();
        assert!(matches!(err, ControllerError::Submit(SubmitError::Conflict(_))));

        let view = c.snapshot().await;
        assert_eq!(view.phase, Phase::Ready);
        assert!(view.current_run.is_none());
        assert!(view.history.is_empty());
        assert!(view.last_error.unwrap().contains("run-9 active"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_conflicts_while_in_progress() {
        let upstream = Arc::new(FakeUpstream::accepting(vec![]));
        let c = ready(upstream.clone()).await;

        let handle = c.start().await.unwrap();
        assert_eq!(handle.as_str(), "US-101-run-1");
        let view = c.snapshot().await;
        assert_eq!(view.phase, Phase::InProgress);
        let run = view.current_run.unwrap();
        assert!(run.started_at.is_some());
        assert!(run.result.is_none());

        assert!(matches!(
            c.start().await,
            Err(ControllerError::Conflict { .. })
        ));
        assert_eq!(upstream.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_during_submit_conflicts() {
        let hold = Arc::new(Notify::new());
        let upstream = Arc::new(FakeUpstream {
            hold_submit: Some(hold.clone()),
            ..FakeUpstream::default()
        });
        let c = Arc::new(ready(upstream.clone()).await);

        let first = tokio::spawn({
            let c = c.clone();
            async move { c.start().await }
        });
        wait_for(&c, Phase::Submitting).await;
        assert!(matches!(
            c.start().await,
            Err(ControllerError::Conflict { .. })
        ));

        hold.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(c.phase().await, Phase::InProgress);
        c.teardown().await;
    }

    #[tokio::test]
    async fn submit_failure_after_uncheck_returns_to_gated() {
        let hold = Arc::new(Notify::new());
        let upstream = Arc::new(FakeUpstream {
            hold_submit: Some(hold.clone()),
            submits: std::sync::Mutex::new(
                vec![Err(SubmitError::Unreachable("refused".into()))].into(),
            ),
            ..FakeUpstream::default()
        });
        let c = Arc::new(ready(upstream).await);

        let first = tokio::spawn({
            let c = c.clone();
            async move { c.start().await }
        });
        wait_for(&c, Phase::Submitting).await;
        c.toggle("a").await.unwrap();
        assert_eq!(c.phase().await, Phase::Submitting);

        hold.notify_one();
        assert!(first.await.unwrap().is_err());
        assert_eq!(c.phase().await, Phase::Gated);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_completed_and_publishes_each_change_once() {
        let upstream = Arc::new(FakeUpstream::accepting(vec![
            Ok(RunState::InProgress),
            Ok(RunState::InProgress),
            Ok(RunState::Completed),
        ]));
        let c = ready(upstream.clone()).await;
        let mut rx = c.subscribe();

        c.start().await.unwrap();
        wait_for(&c, Phase::Completed).await;

        let view = c.snapshot().await;
        let run = view.current_run.unwrap();
        assert_eq!(run.state, RunState::Completed);
        assert_eq!(run.result, Some(serde_json::json!({"deployed": true})));
        assert_eq!(upstream.status_calls.load(Ordering::SeqCst), 3);

        let mut run_updates = 0;
        let mut phases = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                SessionEvent::RunUpdated { .. } => run_updates += 1,
                SessionEvent::PhaseChanged { to, .. } => phases.push(to),
                _ => {}
            }
        }
        assert_eq!(run_updates, 2);
        assert_eq!(
            phases,
            vec![Phase::Submitting, Phase::InProgress, Phase::Completed]
        );

        // Terminal: no further polling.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(upstream.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_without_message_gets_default_error() {
        let upstream = Arc::new(FakeUpstream::accepting(vec![Ok(RunState::Failed)]));
        let c = ready(upstream).await;
        c.start().await.unwrap();
        wait_for(&c, Phase::Failed).await;
        let run = c.snapshot().await.current_run.unwrap();
        assert_eq!(run.error.as_deref(), Some(REMOTE_FAILURE));
    }

    #[tokio::test(start_paused = true)]
    async fn ten_polls_without_terminal_state_fails_with_timeout() {
        let upstream = Arc::new(FakeUpstream::accepting(vec![]));
        let c = ready(upstream.clone()).await;
        c.start().await.unwrap();
        wait_for(&c, Phase::Failed).await;

        let run = c.snapshot().await.current_run.unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert!(run.error.unwrap().contains("10 polls"));
        assert_eq!(upstream.status_calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_errors_are_recorded_then_cleared() {
        let upstream = Arc::new(FakeUpstream::accepting(vec![
            Err(PollError::Http { status: 503 }),
        ]));
        let c = ready(upstream.clone()).await;
        c.start().await.unwrap();

        for _ in 0..20 {
            if upstream.status_calls.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let view = c.snapshot().await;
        assert_eq!(view.phase, Phase::InProgress);
        assert!(view.last_poll_error.unwrap().contains("503"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(c.snapshot().await.last_poll_error.is_none());
        c.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_phase_is_sticky_until_rearm() {
        let upstream = Arc::new(FakeUpstream::accepting(vec![Ok(RunState::Completed)]));
        let c = ready(upstream.clone()).await;
        let first = c.start().await.unwrap();
        wait_for(&c, Phase::Completed).await;

        assert!(matches!(
            c.start().await,
            Err(ControllerError::InvalidState { .. })
        ));
        c.toggle("a").await.unwrap();
        assert_eq!(c.phase().await, Phase::Completed);
        c.toggle("a").await.unwrap();

        assert_eq!(c.rearm().await.unwrap(), Phase::Ready);
        let second = c.start().await.unwrap();
        assert_ne!(first, second);

        let view = c.snapshot().await;
        assert_eq!(view.history.len(), 1);
        assert_eq!(view.history[0].id, first);
        assert_eq!(view.history[0].state, RunState::Completed);
        assert_eq!(view.current_run.unwrap().id, second);
        c.teardown().await;
    }

    #[tokio::test]
    async fn rearm_outside_terminal_phase_is_invalid() {
        let c = ready(Arc::new(FakeUpstream::default())).await;
        assert!(matches!(
            c.rearm().await,
            Err(ControllerError::InvalidState { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_stops_polling_and_drops_late_results() {
        let upstream = Arc::new(FakeUpstream::accepting(vec![Ok(RunState::Completed)]));
        let c = ready(upstream.clone()).await;
        c.start().await.unwrap();
        c.teardown().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(upstream.status_calls.load(Ordering::SeqCst), 0);
        assert_eq!(c.phase().await, Phase::InProgress);
        assert!(matches!(
            c.toggle("b").await,
            Err(ControllerError::TornDown(_))
        ));
    }

    #[tokio::test]
    async fn teardown_during_submit_discards_acknowledgement() {
        let hold = Arc::new(Notify::new());
        let upstream = Arc::new(FakeUpstream {
            hold_submit: Some(hold.clone()),
            ..FakeUpstream::default()
        });
        let c = Arc::new(ready(upstream).await);

        let first = tokio::spawn({
            let c = c.clone();
            async move { c.start().await }
        });
        wait_for(&c, Phase::Submitting).await;
        c.teardown().await;
        hold.notify_one();

        assert!(matches!(
            first.await.unwrap(),
            Err(ControllerError::TornDown(_))
        ));
        assert!(c.snapshot().await.current_run.is_none());
    }
}
