//! Failure-tripping guard for remote calls.
//!
//! A small circuit breaker: calls pass through while the dependency is
//! healthy, and once a configurable number of consecutive failures is
//! reached the guard opens and refuses further calls for a cooldown
//! period. After the cooldown a single probe call is admitted; its result
//! decides whether the guard closes again or stays open.
//!
//! The guard knows nothing about what it wraps: any fallible async
//! operation can be executed through it, and one instance can protect
//! several kinds of calls against a shared failure budget.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Observable state of a [`FailureGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardState {
    /// Calls pass through; failures are being counted.
    Closed,
    /// Too many failures; calls are refused until the cooldown elapses.
    Open,
    /// Cooldown elapsed; a single probe call is in flight.
    HalfOpen,
}

impl std::fmt::Display for GuardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Tuning knobs for a [`FailureGuard`].
#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    /// Consecutive failures that trip the guard. The comparison is
    /// inclusive: the call that brings the count up to the threshold is
    /// the one that opens the guard.
    pub failure_threshold: u32,
    /// How long the guard stays open before admitting a probe call.
    pub reset_timeout: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(60_000),
        }
    }
}

/// Error returned by [`FailureGuard::execute`].
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The guard is open. The wrapped operation was never invoked and no
    /// failure was counted.
    #[error("guard is open; retry in {}ms", retry_in.as_millis())]
    Rejected {
        /// Time remaining until the next probe is admitted. Zero when a
        /// probe is already in flight.
        retry_in: Duration,
    },
    /// The wrapped operation ran and failed. The failure has been counted
    /// against the guard.
    #[error(transparent)]
    Inner(E),
}

impl<E> GuardError<E> {
    /// True when the guard refused the call without running it.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// The wrapped operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Rejected { .. } => None,
            Self::Inner(err) => Some(err),
        }
    }
}

/// Point-in-time view of guard state for status reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GuardSnapshot {
    pub state: GuardState,
    pub failures: u32,
}

/// Called with the new state on every state change. Logging only; the
/// guard's behavior never depends on the hook.
pub type StateChangeHook = Box<dyn Fn(GuardState) + Send + Sync>;

struct GuardCore {
    state: GuardState,
    failures: u32,
    // Only meaningful while `state == Open`; refreshed on every trip.
    retry_at: Instant,
}

/// Circuit breaker over arbitrary fallible async operations.
///
/// All state lives behind one mutex; admission checks and outcome
/// recording are each a single critical section and the lock is never
/// held across the wrapped operation's await.
pub struct FailureGuard {
    config: GuardConfig,
    core: Mutex<GuardCore>,
    on_state_change: Option<StateChangeHook>,
}

impl FailureGuard {
    #[must_use]
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            core: Mutex::new(GuardCore {
                state: GuardState::Closed,
                failures: 0,
                retry_at: Instant::now(),
            }),
            on_state_change: None,
        }
    }

    /// Registers a notification hook invoked on every state change.
    #[must_use]
    pub fn with_state_change_hook(
        mut self,
        hook: impl Fn(GuardState) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Box::new(hook));
        self
    }

    /// Runs `operation` through the guard.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Rejected`] without invoking the operation
    /// when the guard is open (or a probe is already in flight), and
    /// [`GuardError::Inner`] when the operation itself fails.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(retry_in) = self.admit().await {
            return Err(GuardError::Rejected { retry_in });
        }
        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(GuardError::Inner(err))
            }
        }
    }

    /// Current state.
    pub async fn state(&self) -> GuardState {
        self.core.lock().await.state
    }

    /// State and failure count in one consistent read.
    pub async fn snapshot(&self) -> GuardSnapshot {
        let core = self.core.lock().await;
        GuardSnapshot {
            state: core.state,
            failures: core.failures,
        }
    }

    /// Decides whether a call may proceed. `Err` carries the remaining
    /// cooldown.
    async fn admit(&self) -> Result<(), Duration> {
        let transition = {
            let mut core = self.core.lock().await;
            match core.state {
                GuardState::Closed => None,
                // The admitted probe has not completed yet; nothing else
                // may pass until it does.
                GuardState::HalfOpen => return Err(Duration::ZERO),
                GuardState::Open => {
                    let now = Instant::now();
                    if now < core.retry_at {
                        return Err(core.retry_at - now);
                    }
                    core.state = GuardState::HalfOpen;
                    Some(GuardState::HalfOpen)
                }
            }
        };
        if let Some(to) = transition {
            self.notify(to);
        }
        Ok(())
    }

    async fn record_success(&self) {
        let transition = {
            let mut core = self.core.lock().await;
            core.failures = 0;
            if core.state == GuardState::HalfOpen {
                core.state = GuardState::Closed;
                Some(GuardState::Closed)
            } else {
                None
            }
        };
        if let Some(to) = transition {
            self.notify(to);
        }
    }

    async fn record_failure(&self) {
        let transition = {
            let mut core = self.core.lock().await;
            match core.state {
                GuardState::HalfOpen => {
                    // The probe failed. The counter already met the
                    // threshold when the guard first opened; force it
                    // there in the corner where a late success while open
                    // had reset it.
                    core.failures = core.failures.max(self.config.failure_threshold);
                    Self::trip(&mut core, self.config.reset_timeout)
                }
                GuardState::Closed | GuardState::Open => {
                    core.failures = core.failures.saturating_add(1);
                    if core.failures >= self.config.failure_threshold {
                        Self::trip(&mut core, self.config.reset_timeout)
                    } else {
                        None
                    }
                }
            }
        };
        if let Some(to) = transition {
            self.notify(to);
        }
    }

    /// Opens the guard and starts a fresh cooldown. Returns the state
    /// change, if any (re-tripping while already open only refreshes the
    /// cooldown).
    fn trip(core: &mut GuardCore, reset_timeout: Duration) -> Option<GuardState> {
        let was = core.state;
        core.state = GuardState::Open;
        core.retry_at = Instant::now() + reset_timeout;
        (was != GuardState::Open).then_some(GuardState::Open)
    }

    fn notify(&self, to: GuardState) {
        match to {
            GuardState::Open => warn!(state = %to, "guard opened; refusing remote calls"),
            GuardState::HalfOpen => info!(state = %to, "guard half-open; admitting probe call"),
            GuardState::Closed => info!(state = %to, "guard closed; dependency recovered"),
        }
        if let Some(hook) = &self.on_state_change {
            hook(to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Error)]
    #[error("remote call failed")]
    struct RemoteFailure;

    fn quick_guard() -> FailureGuard {
        FailureGuard::new(GuardConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(50),
        })
    }

    async fn fail(guard: &FailureGuard) -> Result<(), GuardError<RemoteFailure>> {
        guard.execute(|| async { Err::<(), _>(RemoteFailure) }).await.map(|_| ())
    }

    async fn succeed(guard: &FailureGuard) -> Result<(), GuardError<RemoteFailure>> {
        guard.execute(|| async { Ok::<_, RemoteFailure>(()) }).await
    }

    #[test]
    fn default_config() {
        let config = GuardConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.reset_timeout, Duration::from_millis(60_000));
    }

    #[tokio::test]
    async fn starts_closed() {
        let guard = quick_guard();
        assert_eq!(guard.state().await, GuardState::Closed);
        assert_eq!(guard.snapshot().await.failures, 0);
    }

    #[tokio::test]
    async fn opens_at_failure_threshold() {
        let guard = quick_guard();
        for _ in 0..2 {
            assert!(fail(&guard).await.is_err());
            assert_eq!(guard.state().await, GuardState::Closed);
        }
        // Third consecutive failure reaches the threshold.
        assert!(fail(&guard).await.is_err());
        let snapshot = guard.snapshot().await;
        assert_eq!(snapshot.state, GuardState::Open);
        assert_eq!(snapshot.failures, 3);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let guard = quick_guard();
        fail(&guard).await.ok();
        fail(&guard).await.ok();
        succeed(&guard).await.unwrap();
        let snapshot = guard.snapshot().await;
        assert_eq!(snapshot.state, GuardState::Closed);
        assert_eq!(snapshot.failures, 0);
    }

    #[tokio::test]
    async fn open_rejects_without_invoking() {
        let guard = quick_guard();
        for _ in 0..3 {
            fail(&guard).await.ok();
        }
        let invocations = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&invocations);
        let result: Result<(), _> = guard
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, RemoteFailure>(())
            })
            .await;
        assert!(matches!(result, Err(GuardError::Rejected { .. })));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        // Rejections do not grow the failure count.
        assert_eq!(guard.snapshot().await.failures, 3);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes() {
        let guard = quick_guard();
        for _ in 0..3 {
            fail(&guard).await.ok();
        }
        tokio::time::sleep(Duration::from_millis(70)).await;
        succeed(&guard).await.unwrap();
        let snapshot = guard.snapshot().await;
        assert_eq!(snapshot.state, GuardState::Closed);
        assert_eq!(snapshot.failures, 0);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let guard = quick_guard();
        for _ in 0..3 {
            fail(&guard).await.ok();
        }
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(fail(&guard).await.is_err());
        let snapshot = guard.snapshot().await;
        assert_eq!(snapshot.state, GuardState::Open);
        assert!(snapshot.failures >= 3);
        // Fresh cooldown: immediately rejected again.
        assert!(matches!(
            fail(&guard).await,
            Err(GuardError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn cooldown_admits_exactly_one_probe() {
        let guard = Arc::new(quick_guard());
        for _ in 0..3 {
            fail(&guard).await.ok();
        }
        tokio::time::sleep(Duration::from_millis(70)).await;

        let invocations = Arc::new(AtomicU32::new(0));
        let slow_probe = |counter: Arc<AtomicU32>, guard: Arc<FailureGuard>| async move {
            guard
                .execute(|| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Ok::<_, RemoteFailure>(())
                })
                .await
        };
        let (first, second) = tokio::join!(
            slow_probe(Arc::clone(&invocations), Arc::clone(&guard)),
            slow_probe(Arc::clone(&invocations), Arc::clone(&guard)),
        );
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(
            first.is_ok() as u8 + second.is_ok() as u8,
            1,
            "exactly one call passes while the probe is in flight"
        );
        assert_eq!(guard.state().await, GuardState::Closed);
    }

    #[tokio::test]
    async fn rejection_carries_remaining_cooldown() {
        let guard = FailureGuard::new(GuardConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(200),
        });
        fail(&guard).await.ok();
        match fail(&guard).await {
            Err(GuardError::Rejected { retry_in }) => {
                assert!(retry_in <= Duration::from_millis(200));
                assert!(retry_in > Duration::ZERO);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn state_change_hook_observes_transitions() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let guard = FailureGuard::new(GuardConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_millis(40),
        })
        .with_state_change_hook(move |state| sink.lock().unwrap().push(state));

        fail(&guard).await.ok();
        fail(&guard).await.ok(); // trips open
        tokio::time::sleep(Duration::from_millis(60)).await;
        succeed(&guard).await.unwrap(); // half-open probe, then closed

        let transitions = seen.lock().unwrap().clone();
        assert_eq!(
            transitions,
            vec![GuardState::Open, GuardState::HalfOpen, GuardState::Closed]
        );
    }
}
