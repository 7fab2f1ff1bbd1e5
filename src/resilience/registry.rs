//! # Circuit Breaker Registry
//!
//! Process-wide registry of circuit breakers, one per protected dependency
//! name, so unrelated call sites share trip/recovery state. Constructed once
//! at startup and passed by dependency injection; tests build isolated
//! registries. Breakers are created lazily and never destroyed or silently
//! re-created: `get_or_create` returns the same instance for the lifetime
//! of the registry.

use crate::config::CircuitBreakerSettings;
use crate::resilience::{CircuitBreaker, CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Registry of circuit breakers for the process's protected dependencies
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    /// Collection of circuit breakers by component name
    circuit_breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,

    /// Configuration (defaults plus per-component overrides)
    settings: CircuitBreakerSettings,
}

impl CircuitBreakerRegistry {
    /// Create a new registry from configuration
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        info!(
            max_circuit_breakers = settings.max_circuit_breakers,
            component_overrides = settings.component_configs.len(),
            "Circuit breaker registry initialized"
        );

        Self {
            circuit_breakers: Arc::new(RwLock::new(HashMap::new())),
            settings,
        }
    }

    /// Get or create the circuit breaker for a component.
    ///
    /// The same `Arc` is returned for every subsequent call with the same
    /// name; configuration is resolved once at creation time.
    pub async fn get_or_create(&self, component_name: &str) -> Arc<CircuitBreaker> {
        // Fast path: breaker already exists
        {
            let breakers = self.circuit_breakers.read().await;
            if let Some(breaker) = breakers.get(component_name) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.circuit_breakers.write().await;

        // Double-check pattern (another task might have created it)
        if let Some(breaker) = breakers.get(component_name) {
            return Arc::clone(breaker);
        }

        if breakers.len() >= self.settings.max_circuit_breakers {
            warn!(
                component = component_name,
                current_count = breakers.len(),
                max_allowed = self.settings.max_circuit_breakers,
                "Circuit breaker limit reached; check for unbounded dependency names"
            );
        }

        let component_config = self
            .settings
            .config_for_component(component_name)
            .to_breaker_config();

        let breaker = Arc::new(CircuitBreaker::new(
            component_name.to_string(),
            component_config,
        ));

        breakers.insert(component_name.to_string(), Arc::clone(&breaker));

        info!(
            component = component_name,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    /// Get all registered component names
    pub async fn component_names(&self) -> Vec<String> {
        let breakers = self.circuit_breakers.read().await;
        breakers.keys().cloned().collect()
    }

    /// Get metrics for a specific component's breaker
    pub async fn component_metrics(&self, component_name: &str) -> Option<CircuitBreakerMetrics> {
        let breakers = self.circuit_breakers.read().await;
        breakers.get(component_name).map(|breaker| breaker.metrics())
    }

    /// Get system-wide circuit breaker metrics
    pub async fn system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();

        let breakers = self.circuit_breakers.read().await;
        for (name, breaker) in breakers.iter() {
            system_metrics.add_circuit_breaker(name.clone(), breaker.metrics());
        }

        system_metrics
    }

    /// Get count of circuit breakers by state
    pub async fn count_by_state(
        &self,
    ) -> HashMap<crate::resilience::CircuitState, usize> {
        self.system_metrics().await.count_by_state()
    }

    /// Check overall system health based on circuit breaker states
    pub async fn health_score(&self) -> f64 {
        self.system_metrics().await.health_score()
    }

    /// Force open all circuit breakers (emergency stop)
    pub async fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open (emergency stop)");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub async fn force_close_all(&self) {
        warn!("Forcing all circuit breakers closed (emergency recovery)");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_closed();
        }
    }

    /// Reset every breaker to closed with a cleared window. Instances are
    /// retained; only their state rewinds.
    pub async fn reset_all(&self) {
        info!("Resetting all circuit breakers");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.reset();
        }
    }
}

impl Clone for CircuitBreakerRegistry {
    fn clone(&self) -> Self {
        Self {
            circuit_breakers: Arc::clone(&self.circuit_breakers),
            settings: self.settings.clone(),
        }
    }
}
