//! # Circuit Breaker Metrics
//!
//! Metrics collection for circuit breaker operations: per-breaker snapshots
//! with cumulative totals and a bounded transition history, plus a
//! system-wide aggregator for health reporting.

use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Maximum transition records retained per breaker
pub const TRANSITION_HISTORY_CAP: usize = 100;

/// A single recorded state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// State before the transition
    pub from: CircuitState,

    /// State after the transition
    pub to: CircuitState,

    /// Wall-clock time of the transition
    pub at: SystemTime,

    /// Short machine-readable cause ("tripped", "reset timeout elapsed", ...)
    pub reason: String,
}

/// Metrics snapshot for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls attempted (admitted calls, not rejections)
    pub total_calls: u64,

    /// Number of successful calls
    pub success_count: u64,

    /// Number of failed calls (timeouts included)
    pub failure_count: u64,

    /// Number of failures that were per-call timeouts
    pub timeout_count: u64,

    /// Calls rejected without reaching the operation (open or probes full)
    pub rejected_count: u64,

    /// Successes recorded in the current window (since the last transition)
    pub window_successes: u64,

    /// Failures recorded in the current window (since the last transition)
    pub window_failures: u64,

    /// Total duration of all admitted operations
    pub total_duration: Duration,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    /// Calculated failure rate (0.0 to 1.0)
    pub failure_rate: f64,

    /// Calculated success rate (0.0 to 1.0)
    pub success_rate: f64,

    /// Average operation duration
    pub average_duration: Duration,

    /// Wall-clock time of the most recent failure, if any
    pub last_failure_at: Option<SystemTime>,

    /// Recent state transitions, oldest first, capped at
    /// [`TRANSITION_HISTORY_CAP`]
    pub transitions: Vec<StateTransition>,
}

impl CircuitBreakerMetrics {
    /// Create new metrics instance with zero values
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            timeout_count: 0,
            rejected_count: 0,
            window_successes: 0,
            window_failures: 0,
            total_duration: Duration::ZERO,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
            success_rate: 0.0,
            average_duration: Duration::ZERO,
            last_failure_at: None,
            transitions: Vec::new(),
        }
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true, // Half-open is attempting recovery
        }
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing dependency health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Success: {:.1}% | Failures: {} | Rejected: {} | Avg Duration: {:.2}ms",
            self.state_description(),
            self.total_calls,
            self.success_rate * 100.0,
            self.failure_count,
            self.rejected_count,
            self.average_duration.as_millis()
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// System-wide circuit breaker metrics aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    /// Metrics for individual circuit breakers by component name
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,

    /// Timestamp of last metrics collection
    pub collected_at: SystemTime,
}

impl SystemCircuitBreakerMetrics {
    /// Create new system metrics
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: SystemTime::now(),
        }
    }

    /// Add metrics for a circuit breaker
    pub fn add_circuit_breaker(&mut self, name: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(name, metrics);
        self.collected_at = SystemTime::now();
    }

    /// Get count of circuit breakers by state
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();

        for metrics in self.circuit_breakers.values() {
            let count = counts.entry(metrics.current_state).or_insert(0);
            *count += 1;
        }

        counts
    }

    /// Get list of unhealthy circuit breakers
    pub fn unhealthy_circuits(&self) -> Vec<(&String, &CircuitBreakerMetrics)> {
        self.circuit_breakers
            .iter()
            .filter(|(_, metrics)| !metrics.is_healthy())
            .collect()
    }

    /// Calculate system-wide health score (0.0 to 1.0)
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0; // No circuit breakers = healthy
        }

        let healthy_count = self
            .circuit_breakers
            .values()
            .filter(|metrics| metrics.is_healthy())
            .count();

        healthy_count as f64 / self.circuit_breakers.len() as f64
    }

    /// Get total calls across all circuit breakers
    pub fn total_calls(&self) -> u64 {
        self.circuit_breakers
            .values()
            .map(|metrics| metrics.total_calls)
            .sum()
    }

    /// Get total failures across all circuit breakers
    pub fn total_failures(&self) -> u64 {
        self.circuit_breakers
            .values()
            .map(|metrics| metrics.failure_count)
            .sum()
    }

    /// Get system-wide failure rate
    pub fn system_failure_rate(&self) -> f64 {
        let total_calls = self.total_calls();
        if total_calls == 0 {
            return 0.0;
        }

        self.total_failures() as f64 / total_calls as f64
    }

    /// Format summary for logging
    pub fn format_summary(&self) -> String {
        let state_counts = self.count_by_state();
        let closed_count = state_counts.get(&CircuitState::Closed).unwrap_or(&0);
        let open_count = state_counts.get(&CircuitState::Open).unwrap_or(&0);
        let half_open_count = state_counts.get(&CircuitState::HalfOpen).unwrap_or(&0);

        format!(
            "Circuit Breakers: {} total | {} closed | {} open | {} half-open | Health: {:.1}% | System failure rate: {:.2}%",
            self.circuit_breakers.len(),
            closed_count,
            open_count,
            half_open_count,
            self.health_score() * 100.0,
            self.system_failure_rate() * 100.0
        )
    }
}

impl Default for SystemCircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_metrics_creation() {
        let metrics = CircuitBreakerMetrics::new();

        assert_eq!(metrics.total_calls, 0);
        assert_eq!(metrics.success_count, 0);
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.rejected_count, 0);
        assert_eq!(metrics.current_state, CircuitState::Closed);
        assert!(metrics.transitions.is_empty());
        assert!(metrics.is_healthy());
    }

    #[test]
    fn test_metrics_health_calculation() {
        let mut metrics = CircuitBreakerMetrics::new();

        // Healthy closed state
        metrics.current_state = CircuitState::Closed;
        metrics.failure_rate = 0.05;
        assert!(metrics.is_healthy());

        // Unhealthy closed state (high failure rate)
        metrics.failure_rate = 0.15;
        assert!(!metrics.is_healthy());

        // Open state is never healthy
        metrics.current_state = CircuitState::Open;
        metrics.failure_rate = 0.0;
        assert!(!metrics.is_healthy());

        // Half-open is considered healthy (recovering)
        metrics.current_state = CircuitState::HalfOpen;
        assert!(metrics.is_healthy());
    }

    #[test]
    fn test_system_metrics_aggregation() {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();

        let mut cb1_metrics = CircuitBreakerMetrics::new();
        cb1_metrics.current_state = CircuitState::Closed;
        cb1_metrics.total_calls = 100;
        cb1_metrics.success_count = 95;
        cb1_metrics.failure_count = 5;
        cb1_metrics.failure_rate = 0.05;

        let mut cb2_metrics = CircuitBreakerMetrics::new();
        cb2_metrics.current_state = CircuitState::Open;
        cb2_metrics.total_calls = 50;
        cb2_metrics.success_count = 25;
        cb2_metrics.failure_count = 25;
        cb2_metrics.failure_rate = 0.5;

        system_metrics.add_circuit_breaker("remote-cache".to_string(), cb1_metrics);
        system_metrics.add_circuit_breaker("webhook-dispatcher".to_string(), cb2_metrics);

        assert_eq!(system_metrics.total_calls(), 150);
        assert_eq!(system_metrics.total_failures(), 30);
        assert_eq!(system_metrics.system_failure_rate(), 0.2);

        let state_counts = system_metrics.count_by_state();
        assert_eq!(state_counts.get(&CircuitState::Closed), Some(&1));
        assert_eq!(state_counts.get(&CircuitState::Open), Some(&1));

        // Health score should be 0.5 (1 healthy out of 2)
        assert_eq!(system_metrics.health_score(), 0.5);

        let unhealthy = system_metrics.unhealthy_circuits();
        assert_eq!(unhealthy.len(), 1);
        assert_eq!(unhealthy[0].0, "webhook-dispatcher");
    }

    #[test]
    fn test_empty_system_is_healthy() {
        let system_metrics = SystemCircuitBreakerMetrics::new();
        assert_eq!(system_metrics.health_score(), 1.0);
        assert_eq!(system_metrics.system_failure_rate(), 0.0);
    }
}
