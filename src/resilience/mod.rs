//! # Resilience Patterns
//!
//! Fault isolation and recovery primitives for calls into remote
//! dependencies: a windowed circuit breaker, a process-wide breaker
//! registry, and retry with exponential backoff.
//!
//! ## Components
//!
//! - [`CircuitBreaker`] - sheds load from a failing dependency and probes
//!   for recovery
//! - [`CircuitBreakerRegistry`] - shares one breaker per dependency name
//!   across all call sites
//! - [`retry_with_backoff`] - bounded retries with jittered exponential
//!   delays

pub mod circuit_breaker;
pub mod metrics;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, Fallback,
};
pub use metrics::{
    CircuitBreakerMetrics, StateTransition, SystemCircuitBreakerMetrics, TRANSITION_HISTORY_CAP,
};
pub use registry::CircuitBreakerRegistry;
pub use retry::{retry_with_backoff, retry_with_backoff_if, RetryPolicy};
