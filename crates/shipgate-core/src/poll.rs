//! Status polling: cadence policy, the per-run poller, and the cancellable
//! task that drives it.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{PollError, TimeoutError};
use crate::service::StatusSource;
use crate::types::{ActionRun, RunHandle};

// ---------------------------------------------------------------------------
// PollPolicy
// ---------------------------------------------------------------------------

/// Capped-exponential polling cadence with multiplicative jitter and an
/// overall budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Growth factor per attempt. `1.0` gives a fixed interval.
    pub multiplier: f64,
    /// Fraction in `[0, 1]`; each delay is scaled by a random factor in
    /// `[1 - jitter, 1 + jitter]` and then capped at `max_interval`.
    pub jitter: f64,
    /// Wall-clock budget from the first poll.
    pub timeout: Duration,
    /// Optional cap on the number of status round trips.
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(15),
            multiplier: 2.0,
            jitter: 0.2,
            timeout: Duration::from_secs(600),
            max_attempts: None,
        }
    }
}

impl PollPolicy {
    /// Fixed interval, no jitter, bounded by attempt count only.
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            jitter: 0.0,
            timeout: Duration::MAX,
            max_attempts: Some(max_attempts),
        }
    }

    /// Delay before poll number `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * multiplier.powi(exponent);
        let cap = self.max_interval.max(self.initial_interval).as_secs_f64();
        Duration::from_secs_f64(secs.min(cap))
    }

    /// Delay before poll number `attempt`, with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        let cap = self.max_interval.max(self.initial_interval);
        base.mul_f64(factor).min(cap)
    }
}

// ---------------------------------------------------------------------------
// StatusPoller
// ---------------------------------------------------------------------------

/// Result of one [`StatusPoller::poll`] call that reached a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The remote state differs from the last observation.
    Changed(ActionRun),
    /// Same remote state as last time; nothing caller-visible happened.
    Unchanged { polled_at: DateTime<Utc> },
    /// The run was already terminal; no round trip was made.
    Finished(ActionRun),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollFailure {
    #[error(transparent)]
    Transient(#[from] PollError),

    #[error(transparent)]
    TimedOut(#[from] TimeoutError),
}

#[derive(Debug, Clone)]
enum Latch {
    Terminal(ActionRun),
    TimedOut(TimeoutError),
}

/// Polls one run until it is terminal or the policy budget is spent.
///
/// The caller owns the cadence (see [`StatusPoller::next_delay`]). Once a
/// terminal state or a timeout has been seen the poller latches and never
/// makes another round trip.
pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    story_id: String,
    handle: RunHandle,
    policy: PollPolicy,
    started: Instant,
    attempts: u32,
    last_seen: Option<ActionRun>,
    latched: Option<Latch>,
}

impl StatusPoller {
    pub fn new(
        source: Arc<dyn StatusSource>,
        story_id: impl Into<String>,
        handle: RunHandle,
        policy: PollPolicy,
    ) -> Self {
        Self {
            source,
            story_id: story_id.into(),
            handle,
            policy,
            started: Instant::now(),
            attempts: 0,
            last_seen: None,
            latched: None,
        }
    }

    /// Treat `run` as already observed, so a first poll reporting the same
    /// state is `Unchanged`.
    pub fn with_baseline(mut self, run: ActionRun) -> Self {
        self.last_seen = Some(run);
        self
    }

    pub fn handle(&self) -> &RunHandle {
        &self.handle
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_finished(&self) -> bool {
        self.latched.is_some()
    }

    pub fn next_delay(&self) -> Duration {
        self.policy.delay(self.attempts)
    }

    pub async fn poll(&mut self) -> Result<PollOutcome, PollFailure> {
        match &self.latched {
            Some(Latch::Terminal(run)) => return Ok(PollOutcome::Finished(run.clone())),
            Some(Latch::TimedOut(e)) => return Err(PollFailure::TimedOut(e.clone())),
            None => {}
        }

        let elapsed = self.started.elapsed();
        let attempts_spent = self
            .policy
            .max_attempts
            .is_some_and(|max| self.attempts >= max);
        if attempts_spent || elapsed >= self.policy.timeout {
            return Err(self.time_out(elapsed).into());
        }

        self.attempts += 1;
        let remaining = self.policy.timeout.saturating_sub(elapsed);
        let response =
            match tokio::time::timeout(
                remaining,
                self.source.action_status(&self.story_id, &self.handle),
            ).await {
                Ok(response) => response,
                Err(_) => {
                    let elapsed = self.started.elapsed();
                    return Err(self.time_out(elapsed).into());
                }
            };

        let mut run = response?;
        let polled_at = Utc::now();
        run.last_polled_at = Some(polled_at);

        if run.is_terminal() {
            debug!(run_id = %self.handle, state = %run.state, attempts = self.attempts, "run reached terminal state");
            self.latched = Some(Latch::Terminal(run.clone()));
            self.last_seen = Some(run.clone());
            return Ok(PollOutcome::Changed(run));
        }

        let changed = self
            .last_seen
            .as_ref()
            .map_or(true, |prev| !prev.same_observation(&run));
        self.last_seen = Some(run.clone());
        if changed {
            Ok(PollOutcome::Changed(run))
        } else {
            Ok(PollOutcome::Unchanged { polled_at })
        }
    }

    fn time_out(&mut self, elapsed: Duration) -> TimeoutError {
        let err = TimeoutError {
            attempts: self.attempts,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        };
        warn!(run_id = %self.handle, attempts = self.attempts, "poll budget exhausted");
        self.latched = Some(Latch::TimedOut(err.clone()));
        err
    }
}

// ---------------------------------------------------------------------------
// PollTask
// ---------------------------------------------------------------------------

/// Shared cancellation flag handed to a polling loop. The loop checks it,
/// under the owner's lock, before applying any result.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Handle to a spawned polling loop.
///
/// Cancelling (or dropping) the handle raises the flag and aborts the task at
/// its next await point.
#[derive(Debug)]
pub struct PollTask {
    abort: Option<AbortHandle>,
    flag: CancelFlag,
}

impl PollTask {
    pub fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancelFlag) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let flag = CancelFlag::default();
        let handle = tokio::spawn(body(flag.clone()));
        Self {
            abort: Some(handle.abort_handle()),
            flag,
        }
    }

    pub fn cancel(&mut self) {
        if let Some(abort) = self.abort.take() {
            self.flag.cancel();
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }

    /// Release the handle without stopping the loop. Used by the loop's owner
    /// once the loop has finished on its own.
    pub fn detach(mut self) {
        self.abort.take();
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunState;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    struct ScriptedSource {
        script: Mutex<VecDeque<Result<ActionRun, PollError>>>,
        fallback: ActionRun,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<ActionRun, PollError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback: run(RunState::InProgress),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn action_status(
            &self,
            _story_id: &str,
            _handle: &RunHandle,
        ) -> Result<ActionRun, PollError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    struct HangingSource;

    #[async_trait]
    impl StatusSource for HangingSource {
        async fn action_status(
            &self,
            _story_id: &str,
            _handle: &RunHandle,
        ) -> Result<ActionRun, PollError> {
            std::future::pending().await
        }
    }

    fn run(state: RunState) -> ActionRun {
        let mut r = ActionRun::started(RunHandle::new("run-1"), "US-101");
        r.state = state;
        r
    }

    fn poller(source: Arc<dyn StatusSource>, policy: PollPolicy) -> StatusPoller {
        StatusPoller::new(source, "US-101", RunHandle::new("run-1"), policy)
            .with_baseline(run(RunState::InProgress))
    }

    // -- policy ------------------------------------------------------------

    #[test]
    fn fixed_policy_never_grows() {
        let p = PollPolicy::fixed(Duration::from_millis(250), 10);
        for attempt in 0..20 {
            assert_eq!(p.delay(attempt), Duration::from_millis(250));
        }
    }

    #[test]
    fn exponential_policy_is_capped() {
        let p = PollPolicy {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: 0.0,
            ..PollPolicy::default()
        };
        assert_eq!(p.base_delay(0), Duration::from_millis(100));
        assert_eq!(p.base_delay(1), Duration::from_millis(200));
        assert_eq!(p.base_delay(3), Duration::from_millis(800));
        assert_eq!(p.base_delay(4), Duration::from_millis(1000));
        assert_eq!(p.base_delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_band_and_cap() {
        let p = PollPolicy {
            initial_interval: Duration::from_millis(1000),
            max_interval: Duration::from_millis(4000),
            multiplier: 2.0,
            jitter: 0.25,
            ..PollPolicy::default()
        };
        for _ in 0..200 {
            let d = p.delay(0);
            assert!(d >= Duration::from_millis(750) && d <= Duration::from_millis(1250));
            assert!(p.delay(10) <= Duration::from_millis(4000));
        }
    }

    #[test]
    fn shrinking_multiplier_is_treated_as_fixed() {
        let p = PollPolicy {
            initial_interval: Duration::from_millis(500),
            multiplier: 0.5,
            jitter: 0.0,
            ..PollPolicy::default()
        };
        assert_eq!(p.base_delay(5), Duration::from_millis(500));
    }

    // -- poller ------------------------------------------------------------

    #[tokio::test]
    async fn repeated_same_state_is_reported_unchanged() {
        let source = ScriptedSource::new(vec![
            Ok(run(RunState::InProgress)),
            Ok(run(RunState::Pending)),
            Ok(run(RunState::Pending)),
        ]);
        let mut p = poller(source.clone(), PollPolicy::fixed(Duration::ZERO, 10));

        assert!(matches!(p.poll().await, Ok(PollOutcome::Unchanged { .. })));
        assert!(matches!(p.poll().await, Ok(PollOutcome::Changed(r)) if r.state == RunState::Pending));
        assert!(matches!(p.poll().await, Ok(PollOutcome::Unchanged { .. })));
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn terminal_state_latches_without_further_round_trips() {
        let source = ScriptedSource::new(vec![Ok(run(RunState::Completed))]);
        let mut p = poller(source.clone(), PollPolicy::fixed(Duration::ZERO, 10));

        let first = p.poll().await.unwrap();
        assert!(matches!(first, PollOutcome::Changed(ref r) if r.state == RunState::Completed));
        assert!(p.is_finished());

        for _ in 0..3 {
            let again = p.poll().await.unwrap();
            assert!(matches!(again, PollOutcome::Finished(ref r) if r.state == RunState::Completed));
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn attempt_budget_times_out_after_ten_polls() {
        let source = ScriptedSource::new(vec![]);
        let mut p = poller(source.clone(), PollPolicy::fixed(Duration::ZERO, 10));

        for _ in 0..10 {
            assert!(p.poll().await.is_ok());
        }
        let err = p.poll().await.unwrap_err();
        assert!(matches!(err, PollFailure::TimedOut(TimeoutError { attempts: 10, .. })));
        assert!(p.poll().await.is_err());
        assert_eq!(source.calls(), 10);
    }

    #[tokio::test]
    async fn transient_errors_consume_attempts_but_do_not_latch() {
        let source = ScriptedSource::new(vec![
            Err(PollError::Unreachable("connection refused".into())),
            Ok(run(RunState::Completed)),
        ]);
        let mut p = poller(source.clone(), PollPolicy::fixed(Duration::ZERO, 5));

        assert!(matches!(p.poll().await, Err(PollFailure::Transient(_))));
        assert!(!p.is_finished());
        assert!(matches!(p.poll().await, Ok(PollOutcome::Changed(_))));
        assert_eq!(p.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_budget_times_out() {
        let source = ScriptedSource::new(vec![]);
        let policy = PollPolicy {
            timeout: Duration::from_secs(30),
            jitter: 0.0,
            ..PollPolicy::default()
        };
        let mut p = poller(source.clone(), policy);

        assert!(p.poll().await.is_ok());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(matches!(p.poll().await, Err(PollFailure::TimedOut(_))));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_round_trip_is_bounded_by_budget() {
        let policy = PollPolicy {
            timeout: Duration::from_secs(5),
            ..PollPolicy::default()
        };
        let mut p = poller(Arc::new(HangingSource), policy);
        let err = p.poll().await.unwrap_err();
        assert!(matches!(err, PollFailure::TimedOut(_)));
    }

    // -- task --------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_applies_its_result() {
        let applied = Arc::new(AtomicBool::new(false));
        let applied_in_task = applied.clone();
        let mut task = PollTask::spawn(move |flag| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if !flag.is_cancelled() {
                applied_in_task.store(true, Ordering::SeqCst);
            }
        });

        task.cancel();
        assert!(task.is_cancelled());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!applied.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn detached_task_runs_to_completion() {
        let applied = Arc::new(AtomicBool::new(false));
        let applied_in_task = applied.clone();
        let task = PollTask::spawn(move |_flag| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            applied_in_task.store(true, Ordering::SeqCst);
        });

        task.detach();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(applied.load(Ordering::SeqCst));
    }
}
