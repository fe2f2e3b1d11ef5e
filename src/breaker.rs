//! Circuit breaker for calls to unreliable external dependencies.
//!
//! # State Machine
//!
//! ```text
//! Closed   --[failures >= threshold]-----------------> Open
//! Open     --[recovery_timeout since last failure]----> HalfOpen (on next read)
//! HalfOpen --[trial succeeds]-------------------------> Closed
//! HalfOpen --[trial fails]----------------------------> Open
//! ```
//!
//! State is evaluated lazily whenever a call arrives; there is no timer task.
//! Time comes from `tokio::time::Instant`, which is monotonic and follows the
//! paused test clock.
//!
//! One breaker guards one dependency and is shared through `Arc` by every
//! caller of that dependency.

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for a circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit (default: 3).
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is let through (default: 30s).
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls fail fast.
    Open,
    /// A single trial call decides between closed and open.
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not executed.
    Open { name: String },
    /// The operation ran and failed.
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerError::Open { name } => write!(f, "circuit breaker '{}' is open", name),
            BreakerError::Inner(error) => error.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Inner(error) => Some(error),
        }
    }
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

/// Point-in-time view of a breaker, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    /// Set while the single half-open trial is running.
    trial_in_flight: bool,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }
}

/// Releases the half-open trial slot if the trial future is dropped mid-call.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

/// Outcome of asking the breaker for permission to run a call.
enum Admission {
    Normal,
    Trial,
    Rejected,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &self.inner)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying the open → half-open transition if due.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.failures,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs(),
        }
    }

    /// Run `operation` through the breaker, counting every error as a failure.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_filtered(operation, |_| true).await
    }

    /// Run `operation` through the breaker, counting only errors for which
    /// `is_expected` returns true. Other errors are returned without touching
    /// the failure counter.
    pub async fn call_filtered<F, Fut, T, E, P>(
        &self,
        operation: F,
        is_expected: P,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let trial = match self.admit() {
            Admission::Normal => false,
            Admission::Trial => true,
            Admission::Rejected => {
                debug!(breaker = %self.name, "Circuit open, failing fast");
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                });
            }
        };

        let mut guard = TrialGuard {
            breaker: self,
            armed: trial,
        };
        let result = operation().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.on_success(trial);
                Ok(value)
            }
            Err(error) => {
                if is_expected(&error) {
                    self.on_failure(trial);
                } else if trial {
                    // Unexpected errors say nothing about the dependency; the
                    // next call gets the trial instead.
                    self.inner.lock().trial_in_flight = false;
                }
                Err(BreakerError::Inner(error))
            }
        }
    }

    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }

        let elapsed = inner
            .last_failure
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX);

        if elapsed >= self.config.recovery_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.failures = 0;
            inner.trial_in_flight = false;
            info!(breaker = %self.name, "Circuit breaker half-open, allowing one trial call");
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => Admission::Rejected,
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Rejected
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();

        if trial || inner.state == CircuitState::HalfOpen {
            info!(breaker = %self.name, "Trial call succeeded, circuit breaker CLOSED");
        }

        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());

        if trial || inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.trial_in_flight = false;
            warn!(breaker = %self.name, "Trial call failed, circuit breaker re-OPENED");
            return;
        }

        inner.failures += 1;
        debug!(
            breaker = %self.name,
            failures = inner.failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker recorded failure"
        );

        if inner.state == CircuitState::Closed && inner.failures >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            warn!(
                breaker = %self.name,
                failures = inner.failures,
                recovery_secs = self.config.recovery_timeout.as_secs_f64(),
                "Circuit breaker OPENED"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(recovery_secs),
            },
        )
    }

    async fn fail(cb: &CircuitBreaker, calls: &AtomicU32) -> Result<(), BreakerError<&'static str>> {
        cb.call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("boom")
        })
        .await
    }

    async fn succeed(cb: &CircuitBreaker, calls: &AtomicU32) -> Result<u32, BreakerError<&'static str>> {
        cb.call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &'static str>(7)
        })
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let cb = breaker(3, 30);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let err = fail(&cb, &calls).await.unwrap_err();
            assert!(!err.is_open());
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let err = succeed(&cb, &calls).await.unwrap_err();
        assert!(err.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let cb = breaker(2, 30);
        let calls = AtomicU32::new(0);

        fail(&cb, &calls).await.unwrap_err();
        fail(&cb, &calls).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().consecutive_failures, 0);

        assert_eq!(succeed(&cb, &calls).await.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 10);
        let calls = AtomicU32::new(0);

        fail(&cb, &calls).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(11)).await;

        let err = fail(&cb, &calls).await.unwrap_err();
        assert!(!err.is_open());
        assert_eq!(cb.state(), CircuitState::Open);

        let err = succeed(&cb, &calls).await.unwrap_err();
        assert!(err.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_single_trial() {
        let cb = Arc::new(breaker(1, 5));
        let calls = Arc::new(AtomicU32::new(0));

        fail(&cb, &calls).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(6)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let cb = Arc::clone(&cb);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cb.call(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let _ = release_rx.await;
                    Ok::<_, &'static str>(1)
                })
                .await
            })
        };

        // Let the trial start and park on the channel.
        tokio::task::yield_now().await;
        while calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }

        let err = succeed(&cb, &calls).await.unwrap_err();
        assert!(err.is_open());

        release_tx.send(()).unwrap();
        assert_eq!(trial.await.unwrap().unwrap(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_unexpected_errors_do_not_count() {
        let cb = breaker(1, 30);

        let result: Result<(), _> = cb
            .call_filtered(|| async { Err::<(), _>("bad request") }, |e| *e != "bad request")
            .await;
        assert!(matches!(result, Err(BreakerError::Inner("bad request"))));
        assert_eq!(cb.state(), CircuitState::Closed);

        let result: Result<(), _> = cb
            .call_filtered(|| async { Err::<(), _>("timeout") }, |e| *e != "bad request")
            .await;
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, 30);
        let calls = AtomicU32::new(0);

        fail(&cb, &calls).await.unwrap_err();
        fail(&cb, &calls).await.unwrap_err();
        succeed(&cb, &calls).await.unwrap();
        fail(&cb, &calls).await.unwrap_err();
        fail(&cb, &calls).await.unwrap_err();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 2);
    }
}
