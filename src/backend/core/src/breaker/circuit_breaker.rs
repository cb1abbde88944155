//! Circuit breaker for calls to unreliable dependencies.
//!
//! Stops calling a dependency after a run of consecutive failures, fails
//! fast while it is open, and lets a single probe through once the reset
//! timeout has elapsed.

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::BreakerSettings;
use crate::error::{ErrorCode, HeraldError};
use crate::telemetry::{BreakerGaugeState, BreakerMetrics};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Failing fast, calls are rejected
    Open,
    /// Probing for recovery, one call at a time
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn gauge(&self) -> BreakerGaugeState {
        match self {
            Self::Closed => BreakerGaugeState::Closed,
            Self::Open => BreakerGaugeState::Open,
            Self::HalfOpen => BreakerGaugeState::HalfOpen,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Name used in logs and metrics
    pub name: String,
    /// Consecutive failures that open a closed breaker
    pub failure_threshold: u32,
    /// Time an open breaker waits before allowing a probe
    pub reset_timeout: Duration,
    /// Consecutive probe successes that close a half-open breaker
    pub success_threshold: u32,
}

impl BreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    pub fn from_settings(name: impl Into<String>, settings: &BreakerSettings) -> Self {
        Self::new(name)
            .with_failure_threshold(settings.failure_threshold)
            .with_reset_timeout(settings.reset_timeout)
            .with_success_threshold(settings.success_threshold)
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was not attempted.
    #[error("circuit '{name}' is open, retry in {retry_after:?}")]
    Open { name: String, retry_after: Duration },

    /// The wrapped operation failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// The inner error, if the call was attempted.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Open { .. } => None,
            Self::Inner(e) => Some(e),
        }
    }
}

impl From<BreakerError<HeraldError>> for HeraldError {
    fn from(error: BreakerError<HeraldError>) -> Self {
        match error {
            BreakerError::Open { name, retry_after } => HeraldError::new(
                ErrorCode::CircuitOpen,
                format!("Dependency '{}' is unavailable, try again later", name),
            )
            .with_context("breaker", &name)
            .with_retry_after(retry_after.as_secs().max(1)),
            BreakerError::Inner(e) => e,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

/// How a call was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

/// Three-state circuit breaker.
///
/// All bookkeeping lives under one mutex, so a state change and the counters
/// it depends on are always observed together. The lock is never held across
/// the wrapped operation's `.await`.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
                probe_in_flight: false,
                total_successes: 0,
                total_failures: 0,
                total_rejections: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Run `op` through the breaker.
    ///
    /// Returns [`BreakerError::Open`] without invoking `op` when the circuit
    /// is open (or a half-open probe is already running).
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit()?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };

        let result = op().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.record_success(admission);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(admission);
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn admit<E>(&self) -> Result<Admission, BreakerError<E>> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.reset_timeout);

                if elapsed >= self.config.reset_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.consecutive_successes = 0;
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                } else {
                    inner.total_rejections += 1;
                    Err(BreakerError::Open {
                        name: self.config.name.clone(),
                        retry_after: self.config.reset_timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.total_rejections += 1;
                    Err(BreakerError::Open {
                        name: self.config.name.clone(),
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        if admission == Admission::Probe {
            inner.probe_in_flight = false;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if admission == Admission::Probe => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.last_failure_at = None;
                }
            }
            // A call admitted before the circuit opened; it says nothing
            // about the current probe.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn record_failure(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        if admission == Admission::Probe {
            inner.probe_in_flight = false;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.last_failure_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if admission == Admission::Probe => {
                inner.consecutive_successes = 0;
                inner.last_failure_at = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn release_probe(&self) {
        self.inner.lock().probe_in_flight = false;
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.config.name,
                from = %from,
                consecutive_failures = inner.consecutive_failures,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                breaker = %self.config.name,
                "Circuit breaker half-open, probing"
            ),
            CircuitState::Closed => tracing::info!(
                breaker = %self.config.name,
                from = %from,
                "Circuit breaker closed"
            ),
        }
        BreakerMetrics::record_transition(&self.config.name, to.as_str(), to.gauge());
    }

    /// Current state.
    ///
    /// An open breaker whose reset timeout has elapsed still reports `Open`
    /// until the next call arrives to probe it.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.config.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    /// Force the breaker closed and clear its counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.last_failure_at = None;
        inner.probe_in_flight = false;
        tracing::info!(breaker = %self.config.name, "Circuit breaker manually reset");
    }
}

/// Frees the half-open probe slot if the caller's future is dropped before
/// the operation finishes.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe();
        }
    }
}
