//! # Retry with Exponential Backoff
//!
//! Generalized retry primitive: run an operation up to `max_attempts` times,
//! sleeping between attempts with exponentially growing, optionally jittered
//! delays. The policy is plain data and a pure function of the attempt
//! number; retryability of a given error is decided by a caller-supplied
//! predicate.
//!
//! ## Composition with circuit breakers
//!
//! This primitive is not breaker-aware. Wrapping a retried operation in a
//! breaker (`breaker.execute(|| retry_with_backoff(...))`) is appropriate
//! only for idempotent, fast setup calls. The inverse (retrying a
//! breaker-protected call) defeats the breaker's fast-fail and pollutes its
//! statistics with repeated attempts; prefer reacting to
//! [`CircuitBreakerError::CircuitOpen`](crate::resilience::CircuitBreakerError)
//! by backing off at the caller.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy: attempt count and delay schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first call
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Multiplier applied for each additional completed attempt
    pub backoff_factor: f64,

    /// Randomize each delay into the 50-100% band to avoid thundering herds
    pub jitter: bool,
}

impl RetryPolicy {
    /// Delay before retrying after `completed_attempts` failed attempts.
    ///
    /// `min(initial_delay * backoff_factor^(completed_attempts - 1),
    /// max_delay)`, then scaled by a random factor in `[0.5, 1.0)` when
    /// jitter is enabled.
    pub fn delay_for_attempt(&self, completed_attempts: u32) -> Duration {
        let exponent = completed_attempts.saturating_sub(1);
        // Compute in float seconds: the exponential can overflow Duration
        // math long before it matters, and min() against the cap absorbs
        // infinity.
        let raw_secs =
            self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent as i32);
        let capped_secs = raw_secs.min(self.max_delay.as_secs_f64()).max(0.0);

        let delay = Duration::from_secs_f64(capped_secs);
        if self.jitter {
            delay.mul_f64(0.5 + fastrand::f64() * 0.5)
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

/// Retry an operation with exponential backoff, treating every error as
/// retryable.
///
/// Returns the first success, or the last error once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if(policy, operation, |_| true).await
}

/// Retry an operation with exponential backoff and a retryability predicate.
///
/// A non-retryable error propagates immediately without further attempts or
/// sleeps.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt == max_attempts {
                    debug!(
                        attempt = attempt,
                        error = %error,
                        "Attempts exhausted, propagating last failure"
                    );
                    return Err(error);
                }

                if !is_retryable(&error) {
                    debug!(
                        attempt = attempt,
                        error = %error,
                        "Error not retryable, propagating"
                    );
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed, backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    // The loop always returns on the final attempt
    unreachable!("retry loop exited without returning")
}
