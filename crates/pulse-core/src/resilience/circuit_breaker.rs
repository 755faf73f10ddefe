//! Circuit breaker with a count-based sliding window.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED --[failure or slow rate >= threshold over window]--> OPEN
//!   ^                                                           |
//!   |                                                    [wait duration]
//!   |                                                           v
//!   +----[trial rates below threshold]---- HALF_OPEN (N trials)-+
//!                                               |
//!                      OPEN <--[trial rates at or above threshold]
//! ```
//!
//! Only errors for which [`AppError::should_trip_circuit`] is true are
//! recorded as failures. Remote rejections (4xx) are recorded as nothing at
//! all: they neither heal nor harm the circuit.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use super::{PolicyError, PolicyRejection};
use crate::config::env_or;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
    /// Circuit is half-open - a limited number of trial calls are allowed.
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding for gauges.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of most recent calls the rates are computed over.
    pub sliding_window_size: usize,

    /// Rates are not evaluated until this many calls are in the window.
    pub minimum_calls: usize,

    /// Failure percentage (0-100) at which the circuit opens.
    pub failure_rate_threshold: f32,

    /// Calls slower than this count as slow, whatever their outcome.
    pub slow_call_duration: Duration,

    /// Slow-call percentage (0-100) at which the circuit opens.
    pub slow_call_rate_threshold: f32,

    /// Time spent open before probing.
    pub wait_duration_in_open: Duration,

    /// Number of trial calls admitted while half-open.
    pub permitted_calls_in_half_open: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            sliding_window_size: 10,
            minimum_calls: 5,
            failure_rate_threshold: 50.0,
            slow_call_duration: Duration::from_secs(5),
            slow_call_rate_threshold: 100.0,
            wait_duration_in_open: Duration::from_secs(10),
            permitted_calls_in_half_open: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates config from environment variables with fallback to defaults.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            sliding_window_size: env_or("CB_SLIDING_WINDOW_SIZE", default.sliding_window_size),
            minimum_calls: env_or("CB_MINIMUM_CALLS", default.minimum_calls),
            failure_rate_threshold: env_or(
                "CB_FAILURE_RATE_THRESHOLD",
                default.failure_rate_threshold,
            ),
            wait_duration_in_open: Duration::from_secs(env_or(
                "CB_WAIT_DURATION_SECS",
                default.wait_duration_in_open.as_secs(),
            )),
            permitted_calls_in_half_open: env_or(
                "CB_HALF_OPEN_CALLS",
                default.permitted_calls_in_half_open,
            ),
            ..default
        }
    }
}

/// Outcome of a recorded call.
#[derive(Debug, Clone, Copy)]
struct CallRecord {
    failed: bool,
    slow: bool,
}

/// Internal state tracking for the circuit breaker.
#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    window: VecDeque<CallRecord>,
    opened_at: Option<Instant>,
    half_open_issued: usize,
    half_open_results: Vec<CallRecord>,
    last_error_message: Option<String>,
}

impl CircuitBreakerInner {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::with_capacity(config.sliding_window_size),
            opened_at: None,
            half_open_issued: 0,
            half_open_results: Vec::new(),
            last_error_message: None,
        }
    }
}

/// Failure and slow-call percentages over a set of records.
fn rates<'a>(records: impl Iterator<Item = &'a CallRecord>) -> (f32, f32, usize) {
    let (mut total, mut failed, mut slow) = (0usize, 0usize, 0usize);
    for r in records {
        total += 1;
        failed += r.failed as usize;
        slow += r.slow as usize;
    }
    if total == 0 {
        return (0.0, 0.0, 0);
    }
    (
        failed as f32 * 100.0 / total as f32,
        slow as f32 * 100.0 / total as f32,
        total,
    )
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Name of the circuit breaker.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Calls currently in the sliding window.
    pub buffered_calls: usize,
    /// Failure percentage over the window.
    pub failure_rate: f32,
    /// Slow-call percentage over the window.
    pub slow_call_rate: f32,
    /// Last error message if any.
    pub last_error: Option<String>,
    /// Time until circuit may transition to half-open (if currently open).
    pub time_until_half_open: Option<Duration>,
}

/// Thread-safe circuit breaker for protecting external API calls.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with the given name and configuration.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let inner = CircuitBreakerInner::new(&config);
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns the name of this circuit breaker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state of the circuit.
    ///
    /// Note: This also handles lazy state transitions from Open to HalfOpen
    /// when the wait duration has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// Returns circuit breaker statistics for monitoring.
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_transition_to_half_open(&mut inner);

        let (failure_rate, slow_call_rate, buffered_calls) = rates(inner.window.iter());

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            buffered_calls,
            failure_rate,
            slow_call_rate,
            last_error: inner.last_error_message.clone(),
            time_until_half_open: self.remaining_open(&inner),
        }
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// - If circuit is Closed: executes operation, records outcome and latency
    /// - If circuit is Open: returns `PolicyRejection::CircuitOpen` immediately
    /// - If circuit is HalfOpen: executes operation if a trial slot is free
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, PolicyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PolicyError>>,
    {
        self.try_acquire_permission()?;

        let started = Instant::now();
        let result = operation().await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => self.record_success(elapsed),
            Err(PolicyError::Inner(e)) if e.should_trip_circuit() => {
                self.record_failure(elapsed, &e.to_string())
            }
            // Remote rejections and inner policy rejections are not about
            // this dependency's health.
            Err(_) => self.release_permission(),
        }

        result
    }

    /// Checks whether a call may proceed, reserving a trial slot in half-open.
    fn try_acquire_permission(&self) -> Result<(), PolicyError> {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_transition_to_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(PolicyError::Rejected(PolicyRejection::CircuitOpen {
                name: self.name.clone(),
                retry_after: self.remaining_open(&inner).unwrap_or(Duration::ZERO),
            })),
            CircuitState::HalfOpen => {
                if inner.half_open_issued < self.config.permitted_calls_in_half_open {
                    inner.half_open_issued += 1;
                    Ok(())
                } else {
                    Err(PolicyError::Rejected(PolicyRejection::CircuitOpen {
                        name: self.name.clone(),
                        retry_after: Duration::ZERO,
                    }))
                }
            }
        }
    }

    /// Gives back a half-open trial slot for a call whose outcome is ignored.
    fn release_permission(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::HalfOpen && inner.half_open_issued > 0 {
            inner.half_open_issued -= 1;
        }
    }

    /// Records a successful operation.
    pub fn record_success(&self, elapsed: Duration) {
        self.record(CallRecord {
            failed: false,
            slow: elapsed > self.config.slow_call_duration,
        });
    }

    /// Records a failed operation.
    pub fn record_failure(&self, elapsed: Duration, error: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.last_error_message = Some(error.to_string());
        }
        self.record(CallRecord {
            failed: true,
            slow: elapsed > self.config.slow_call_duration,
        });
    }

    fn record(&self, call: CallRecord) {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_transition_to_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => {
                if inner.window.len() == self.config.sliding_window_size {
                    inner.window.pop_front();
                }
                inner.window.push_back(call);

                let (failure_rate, slow_rate, total) = rates(inner.window.iter());
                if total >= self.config.minimum_calls && self.exceeds(failure_rate, slow_rate) {
                    tracing::warn!(
                        circuit = %self.name,
                        failure_rate,
                        slow_call_rate = slow_rate,
                        calls = total,
                        error = inner.last_error_message.as_deref().unwrap_or(""),
                        "Circuit breaker opening"
                    );
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_results.push(call);
                if inner.half_open_results.len() >= self.config.permitted_calls_in_half_open {
                    let (failure_rate, slow_rate, _) = rates(inner.half_open_results.iter());
                    if self.exceeds(failure_rate, slow_rate) {
                        tracing::warn!(
                            circuit = %self.name,
                            failure_rate,
                            slow_call_rate = slow_rate,
                            "Circuit breaker trial calls failed, returning to open state"
                        );
                        self.open(&mut inner);
                    } else {
                        tracing::info!(
                            circuit = %self.name,
                            "Circuit breaker closing after {} successful trial calls",
                            inner.half_open_results.len()
                        );
                        self.close(&mut inner);
                    }
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late.
            }
        }
    }

    fn exceeds(&self, failure_rate: f32, slow_rate: f32) -> bool {
        failure_rate >= self.config.failure_rate_threshold
            || slow_rate >= self.config.slow_call_rate_threshold
    }

    fn open(&self, inner: &mut CircuitBreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.half_open_issued = 0;
        inner.half_open_results.clear();
    }

    fn close(&self, inner: &mut CircuitBreakerInner) {
        inner.state = CircuitState::Closed;
        inner.window.clear();
        inner.opened_at = None;
        inner.half_open_issued = 0;
        inner.half_open_results.clear();
        inner.last_error_message = None;
    }

    /// Manually resets the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
        self.close(&mut inner);
    }

    fn remaining_open(&self, inner: &CircuitBreakerInner) -> Option<Duration> {
        if inner.state != CircuitState::Open {
            return None;
        }
        inner.opened_at.map(|t| {
            self.config
                .wait_duration_in_open
                .saturating_sub(t.elapsed())
        })
    }

    /// Check if we should transition from Open to HalfOpen.
    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        if let Some(opened_at) = inner.opened_at {
            if opened_at.elapsed() >= self.config.wait_duration_in_open {
                tracing::info!(
                    circuit = %self.name,
                    "Circuit breaker transitioning to half-open state"
                );
                inner.state = CircuitState::HalfOpen;
                inner.half_open_issued = 0;
                inner.half_open_results.clear();
            }
        }
    }
}
