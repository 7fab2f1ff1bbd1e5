//! # Circuit Breaker Implementation
//!
//! Provides fault isolation to prevent cascade failures when a remote
//! dependency degrades. This implementation follows the classic circuit
//! breaker pattern with three states: Closed (normal operation), Open
//! (failing fast), and Half-Open (testing recovery).
//!
//! Trip decisions are windowed: counters accumulate between state
//! transitions, and the breaker opens only once the window holds at least
//! `volume_threshold` calls and either the failure percentage or the
//! absolute failure count crosses its threshold. While half-open, a small
//! bounded number of concurrent probes is admitted; slots are released
//! through a drop guard so timeout and panic paths cannot leak them.

use crate::resilience::metrics::{CircuitBreakerMetrics, StateTransition, TRANSITION_HISTORY_CAP};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - limited probe calls allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Runtime configuration for a single circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Absolute failure count within the window that trips the breaker
    pub failure_threshold: u32,

    /// Minimum calls in the window before trip conditions are evaluated
    pub volume_threshold: u32,

    /// Failure percentage (0-100) within the window that trips the breaker
    pub error_threshold_percentage: f64,

    /// Time to wait in open state before admitting a recovery probe
    pub reset_timeout: Duration,

    /// Per-call timeout; expiry is counted as a failure
    pub request_timeout: Duration,

    /// Maximum concurrent probes admitted while half-open
    pub half_open_max_probes: u32,
}

impl CircuitBreakerConfig {
    /// Successes required to close from half-open.
    ///
    /// Cumulative across the half-open episode: half the volume threshold,
    /// at least one.
    pub fn success_threshold(&self) -> u64 {
        u64::from(self.volume_threshold / 2).max(1)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            volume_threshold: 10,
            error_threshold_percentage: 50.0,
            reset_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
            half_open_max_probes: 3,
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Call refused without reaching the operation: the circuit is open, or
    /// half-open with all probe slots taken. Not counted as a dependency
    /// failure; callers should back off rather than retry aggressively.
    #[error("Circuit breaker is {state} for {component}, call rejected")]
    CircuitOpen {
        component: String,
        state: CircuitState,
    },

    /// The wrapped operation failed and the failure was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),

    /// The wrapped operation exceeded the per-call timeout. Counted
    /// identically to a failure; the distinct variant exists for diagnostics.
    #[error("Operation timed out after {elapsed:?} for {component}")]
    OperationTimeout {
        component: String,
        elapsed: Duration,
    },
}

impl<E> CircuitBreakerError<E> {
    /// True when the call was rejected without invoking the operation
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// True when the failure was a per-call timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::OperationTimeout { .. })
    }
}

/// Fallback supplied alongside a protected call: either a ready value or a
/// producer invoked only when needed.
pub enum Fallback<T> {
    /// A precomputed fallback value
    Value(T),
    /// A producer invoked when the protected call fails or is rejected
    Producer(Box<dyn Fn() -> T + Send + Sync>),
}

impl<T> Fallback<T> {
    /// Fallback to a ready value
    pub fn value(value: T) -> Self {
        Self::Value(value)
    }

    /// Fallback to a lazily-invoked producer
    pub fn producer(producer: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::Producer(Box::new(producer))
    }

    fn resolve(self) -> T {
        match self {
            Self::Value(value) => value,
            Self::Producer(producer) => producer(),
        }
    }
}

impl<T> std::fmt::Debug for Fallback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Fallback::Value(..)"),
            Self::Producer(_) => f.write_str("Fallback::Producer(..)"),
        }
    }
}

/// Lock-free cumulative counters, bumped on every admitted call.
#[derive(Debug)]
struct AtomicTotals {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    timeout_count: AtomicU64,
    rejected_count: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicTotals {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            timeout_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self, duration: Duration, timed_out: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timeout_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }
}

/// Window counters, reset on every state transition.
#[derive(Debug)]
struct WindowCounters {
    successes: AtomicU64,
    failures: AtomicU64,
}

impl WindowCounters {
    fn new() -> Self {
        Self {
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    #[inline]
    fn reset(&self) {
        self.successes.store(0, Ordering::Release);
        self.failures.store(0, Ordering::Release);
    }
}

/// Get current epoch nanos from SystemTime
#[inline]
fn epoch_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

/// Releases a half-open probe slot when dropped, so every admission is
/// balanced by exactly one release regardless of how the probe ends.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        self.breaker
            .half_open_in_flight
            .fetch_sub(1, Ordering::AcqRel);
    }
}

/// Core circuit breaker with atomic state management.
///
/// One instance protects one logical dependency; instances are shared via
/// [`crate::resilience::CircuitBreakerRegistry`] so unrelated call sites for
/// the same dependency observe the same trip/recovery state.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,

    /// Configuration parameters
    config: CircuitBreakerConfig,

    /// Counters for the current window (since the last transition)
    window: WindowCounters,

    /// Probes currently executing while half-open
    half_open_in_flight: AtomicU64,

    /// Successes accumulated across the current half-open episode
    half_open_successes: AtomicU64,

    /// Epoch nanos when circuit was opened (0 = not open)
    opened_at_epoch_nanos: AtomicU64,

    /// Epoch nanos of the most recent recorded failure (0 = none yet)
    last_failure_at_epoch_nanos: AtomicU64,

    /// Lock-free cumulative totals
    totals: AtomicTotals,

    /// Bounded transition history. Guarded by a non-async mutex held only
    /// for an O(1) push or a clone; never across an await point.
    history: Mutex<VecDeque<StateTransition>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            volume_threshold = config.volume_threshold,
            error_threshold_percentage = config.error_threshold_percentage,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            request_timeout_ms = config.request_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            window: WindowCounters::new(),
            half_open_in_flight: AtomicU64::new(0),
            half_open_successes: AtomicU64::new(0),
            opened_at_epoch_nanos: AtomicU64::new(0),
            last_failure_at_epoch_nanos: AtomicU64::new(0),
            totals: AtomicTotals::new(),
            history: Mutex::new(VecDeque::with_capacity(TRANSITION_HISTORY_CAP)),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// Applies the per-call timeout, records the outcome against the current
    /// window, and drives state transitions. While open, calls are rejected
    /// with [`CircuitBreakerError::CircuitOpen`] without invoking the
    /// operation.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _slot = match self.try_admit() {
            Ok(slot) => slot,
            Err(state) => {
                self.totals.rejected_count.fetch_add(1, Ordering::Relaxed);
                debug!(component = %self.name, state = %state, "Call rejected (failing fast)");
                return Err(CircuitBreakerError::CircuitOpen {
                    component: self.name.clone(),
                    state,
                });
            }
        };

        let start = Instant::now();
        match tokio::time::timeout(self.config.request_timeout, operation()).await {
            Ok(Ok(value)) => {
                self.record_success(start.elapsed());
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record_failure(start.elapsed(), false);
                Err(CircuitBreakerError::OperationFailed(error))
            }
            Err(_) => {
                let elapsed = start.elapsed();
                self.record_failure(elapsed, true);
                Err(CircuitBreakerError::OperationTimeout {
                    component: self.name.clone(),
                    elapsed,
                })
            }
        }
    }

    /// Execute an operation, resolving the fallback on any failure or
    /// rejection instead of propagating the error.
    pub async fn execute_with_fallback<F, Fut, T, E>(
        &self,
        operation: F,
        fallback: Fallback<T>,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match self.execute(operation).await {
            Ok(value) => value,
            Err(error) => {
                debug!(
                    component = %self.name,
                    error = %error,
                    "Protected call failed, resolving fallback"
                );
                fallback.resolve()
            }
        }
    }

    /// Decide whether the current call may proceed.
    ///
    /// Returns the probe slot guard when admitted half-open, `Ok(None)` for
    /// a closed pass-through, or the rejecting state.
    fn try_admit(&self) -> Result<Option<ProbeSlot<'_>>, CircuitState> {
        loop {
            match self.state() {
                CircuitState::Closed => return Ok(None),
                CircuitState::Open => {
                    let opened_nanos = self.opened_at_epoch_nanos.load(Ordering::Acquire);
                    if opened_nanos == 0 {
                        // Open without a timestamp should not happen; admit
                        // rather than wedge the dependency shut.
                        warn!(component = %self.name, "Circuit open but no timestamp recorded");
                        return Ok(None);
                    }

                    let elapsed_nanos = epoch_nanos_now().saturating_sub(opened_nanos);
                    if elapsed_nanos >= self.config.reset_timeout.as_nanos() as u64 {
                        self.transition(
                            CircuitState::Open,
                            CircuitState::HalfOpen,
                            "reset timeout elapsed",
                        );
                        // Re-read the state: whichever caller won the race,
                        // this call is now subject to half-open admission.
                        continue;
                    }

                    return Err(CircuitState::Open);
                }
                CircuitState::HalfOpen => {
                    let max_probes = u64::from(self.config.half_open_max_probes);
                    let admitted = self
                        .half_open_in_flight
                        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_flight| {
                            (in_flight < max_probes).then_some(in_flight + 1)
                        })
                        .is_ok();

                    if admitted {
                        return Ok(Some(ProbeSlot { breaker: self }));
                    }
                    return Err(CircuitState::HalfOpen);
                }
            }
        }
    }

    /// Record a successful operation (lock-free)
    fn record_success(&self, duration: Duration) {
        self.totals.record_success(duration);

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Protected call succeeded"
        );

        match self.state() {
            CircuitState::Closed => {
                self.window.successes.fetch_add(1, Ordering::AcqRel);
            }
            CircuitState::HalfOpen => {
                self.window.successes.fetch_add(1, Ordering::AcqRel);
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold() {
                    self.transition(CircuitState::HalfOpen, CircuitState::Closed, "recovered");
                }
            }
            CircuitState::Open => {
                // A result that raced with a trip; totals already account for it
                warn!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation (lock-free)
    fn record_failure(&self, duration: Duration, timed_out: bool) {
        self.totals.record_failure(duration, timed_out);
        self.last_failure_at_epoch_nanos
            .store(epoch_nanos_now(), Ordering::Release);

        error!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            timed_out = timed_out,
            "Protected call failed"
        );

        match self.state() {
            CircuitState::Closed => {
                let failures = self.window.failures.fetch_add(1, Ordering::AcqRel) + 1;
                let successes = self.window.successes.load(Ordering::Acquire);
                let window_total = failures + successes;

                if window_total >= u64::from(self.config.volume_threshold) {
                    let failure_percentage = failures as f64 / window_total as f64 * 100.0;
                    if failure_percentage >= self.config.error_threshold_percentage
                        || failures >= u64::from(self.config.failure_threshold)
                    {
                        self.transition(CircuitState::Closed, CircuitState::Open, "tripped");
                    }
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure immediately re-opens the circuit
                self.transition(
                    CircuitState::HalfOpen,
                    CircuitState::Open,
                    "failed during half-open",
                );
            }
            CircuitState::Open => {
                // Late-arriving result after another caller tripped the breaker
            }
        }
    }

    /// Attempt the `from` → `to` transition.
    ///
    /// The compare-exchange guarantees exactly one caller performs a given
    /// transition when several race for it; only the winner resets the
    /// window and appends to the history.
    fn transition(&self, from: CircuitState, to: CircuitState, reason: &'static str) -> bool {
        if self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        match to {
            CircuitState::Open => {
                self.opened_at_epoch_nanos
                    .store(epoch_nanos_now(), Ordering::Release);
            }
            CircuitState::Closed => {
                self.opened_at_epoch_nanos.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {}
        }

        self.window.reset();
        self.half_open_successes.store(0, Ordering::Release);
        self.push_transition(from, to, reason);

        match to {
            CircuitState::Open => error!(
                component = %self.name,
                reason = reason,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "Circuit breaker opened (failing fast)"
            ),
            CircuitState::HalfOpen => info!(
                component = %self.name,
                reason = reason,
                max_probes = self.config.half_open_max_probes,
                success_threshold = self.config.success_threshold(),
                "Circuit breaker half-open (testing recovery)"
            ),
            CircuitState::Closed => info!(
                component = %self.name,
                reason = reason,
                "Circuit breaker closed (recovered)"
            ),
        }

        true
    }

    /// Move to `to` from whatever the current state is (admin operations)
    fn force_transition(&self, to: CircuitState, reason: &'static str) {
        let previous = CircuitState::from(self.state.swap(to as u8, Ordering::AcqRel));

        match to {
            CircuitState::Open => {
                self.opened_at_epoch_nanos
                    .store(epoch_nanos_now(), Ordering::Release);
            }
            _ => {
                self.opened_at_epoch_nanos.store(0, Ordering::Release);
            }
        }

        self.window.reset();
        self.half_open_successes.store(0, Ordering::Release);

        if previous != to {
            self.push_transition(previous, to, reason);
        }
    }

    fn push_transition(&self, from: CircuitState, to: CircuitState, reason: &'static str) {
        let mut history = self.history.lock();
        if history.len() == TRANSITION_HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(StateTransition {
            from,
            to,
            at: SystemTime::now(),
            reason: reason.to_string(),
        });
    }

    /// Force circuit to open state (emergency kill switch)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        self.force_transition(CircuitState::Open, "forced open");
    }

    /// Force circuit to closed state (emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        self.force_transition(CircuitState::Closed, "forced closed");
    }

    /// Reset to closed with a cleared window. The breaker instance survives;
    /// cumulative totals and history are retained for diagnostics.
    pub fn reset(&self) {
        info!(component = %self.name, "Circuit breaker reset");
        self.force_transition(CircuitState::Closed, "reset");
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.state();
        let total_calls = self.totals.total_calls.load(Ordering::Relaxed);
        let success_count = self.totals.success_count.load(Ordering::Relaxed);
        let failure_count = self.totals.failure_count.load(Ordering::Relaxed);
        let total_duration_nanos = self.totals.total_duration_nanos.load(Ordering::Relaxed);

        let (failure_rate, success_rate, average_duration) = if total_calls > 0 {
            let fr = failure_count as f64 / total_calls as f64;
            let sr = success_count as f64 / total_calls as f64;
            let avg = Duration::from_nanos(total_duration_nanos / total_calls);
            (fr, sr, avg)
        } else {
            (0.0, 0.0, Duration::ZERO)
        };

        let last_failure_nanos = self.last_failure_at_epoch_nanos.load(Ordering::Acquire);
        let last_failure_at = (last_failure_nanos > 0)
            .then(|| SystemTime::UNIX_EPOCH + Duration::from_nanos(last_failure_nanos));

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            timeout_count: self.totals.timeout_count.load(Ordering::Relaxed),
            rejected_count: self.totals.rejected_count.load(Ordering::Relaxed),
            window_successes: self.window.successes.load(Ordering::Acquire),
            window_failures: self.window.failures.load(Ordering::Acquire),
            total_duration: Duration::from_nanos(total_duration_nanos),
            current_state: state,
            failure_rate,
            success_rate,
            average_duration,
            last_failure_at,
            transitions: self.history.lock().iter().cloned().collect(),
        }
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        if self.state() != CircuitState::Closed {
            return false;
        }

        let total_calls = self.totals.total_calls.load(Ordering::Relaxed);
        if total_calls < 10 {
            // Too few calls to determine health
            return true;
        }

        let failure_count = self.totals.failure_count.load(Ordering::Relaxed);
        let failure_rate = failure_count as f64 / total_calls as f64;
        failure_rate < 0.1
    }
}
