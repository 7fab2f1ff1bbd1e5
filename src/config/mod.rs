//! # Configuration Management
//!
//! Serde-based configuration for the resilience core: circuit breaker
//! thresholds, cache tier sizing, and retry policy defaults. Durations are
//! expressed as integer `*_seconds`/`*_ms` fields in the on-disk format with
//! `Duration` accessor methods on the structs.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variable overrides. See [`loader`].

pub mod loader;

pub use loader::{ConfigurationError, ConfigResult};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::resilience::CircuitBreakerConfig;
use crate::resilience::RetryPolicy;

/// Root configuration for the resilience core
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Circuit breaker registry settings
    pub circuit_breakers: CircuitBreakerSettings,

    /// Cache manager settings
    pub cache: CacheSettings,

    /// Default retry policy settings
    pub retry: RetrySettings,
}

impl CoreConfig {
    /// Validate the full configuration tree
    pub fn validate(&self) -> Result<(), String> {
        self.circuit_breakers.validate()?;
        self.cache.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

/// Registry-level circuit breaker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Soft cap on the number of breakers a registry will track before warning
    pub max_circuit_breakers: usize,

    /// Default configuration for breakers without a component-specific entry
    pub default_config: BreakerComponentConfig,

    /// Per-component overrides keyed by dependency name
    pub component_configs: HashMap<String, BreakerComponentConfig>,
}

impl CircuitBreakerSettings {
    /// Get configuration for a specific component, falling back to the default
    pub fn config_for_component(&self, component_name: &str) -> BreakerComponentConfig {
        self.component_configs
            .get(component_name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    /// Validate registry settings and every component entry
    pub fn validate(&self) -> Result<(), String> {
        if self.max_circuit_breakers == 0 {
            return Err("max_circuit_breakers must be greater than 0".to_string());
        }

        if self.max_circuit_breakers > 1000 {
            return Err("max_circuit_breakers should not exceed 1000".to_string());
        }

        self.default_config.validate()?;
        for (name, config) in &self.component_configs {
            config
                .validate()
                .map_err(|e| format!("component '{name}': {e}"))?;
        }

        Ok(())
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            max_circuit_breakers: 50,
            default_config: BreakerComponentConfig::default(),
            component_configs: HashMap::new(),
        }
    }
}

/// Circuit breaker configuration for a single protected dependency
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerComponentConfig {
    /// Absolute failure count within the current window that trips the breaker
    pub failure_threshold: u32,

    /// Minimum calls in the window before trip conditions are evaluated
    pub volume_threshold: u32,

    /// Failure percentage (0-100) within the window that trips the breaker
    pub error_threshold_percentage: f64,

    /// Time to wait in open state before admitting a recovery probe
    pub reset_timeout_ms: u64,

    /// Per-call timeout; expiry counts as a failure
    pub request_timeout_ms: u64,

    /// Maximum concurrent probes admitted while half-open
    pub half_open_max_probes: u32,
}

impl BreakerComponentConfig {
    /// Get reset timeout as Duration
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Convert to the resilience module's runtime format
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            volume_threshold: self.volume_threshold,
            error_threshold_percentage: self.error_threshold_percentage,
            reset_timeout: self.reset_timeout(),
            request_timeout: self.request_timeout(),
            half_open_max_probes: self.half_open_max_probes,
        }
    }

    /// Create configuration suited to the shared remote cache
    pub fn for_remote_cache() -> Self {
        Self {
            failure_threshold: 5,
            volume_threshold: 10,
            error_threshold_percentage: 50.0,
            reset_timeout_ms: 30_000,
            request_timeout_ms: 2_000,
            half_open_max_probes: 3,
        }
    }

    /// Create configuration suited to the primary data store
    pub fn for_data_store() -> Self {
        Self {
            failure_threshold: 5,
            volume_threshold: 10,
            error_threshold_percentage: 50.0,
            reset_timeout_ms: 30_000,
            request_timeout_ms: 10_000,
            half_open_max_probes: 3,
        }
    }

    /// Create configuration suited to the webhook dispatcher
    pub fn for_webhook_dispatcher() -> Self {
        Self {
            failure_threshold: 3,
            volume_threshold: 5,
            error_threshold_percentage: 50.0,
            reset_timeout_ms: 60_000,
            request_timeout_ms: 15_000,
            half_open_max_probes: 2,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.volume_threshold == 0 {
            return Err("volume_threshold must be greater than 0".to_string());
        }

        if !(0.0..=100.0).contains(&self.error_threshold_percentage) {
            return Err("error_threshold_percentage must be between 0 and 100".to_string());
        }

        if self.reset_timeout_ms == 0 {
            return Err("reset_timeout_ms must be greater than 0".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be greater than 0".to_string());
        }

        if self.half_open_max_probes == 0 {
            return Err("half_open_max_probes must be greater than 0".to_string());
        }

        if self.half_open_max_probes > 10 {
            return Err("half_open_max_probes should not exceed 10".to_string());
        }

        Ok(())
    }
}

impl Default for BreakerComponentConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            volume_threshold: 10,
            error_threshold_percentage: 50.0,
            reset_timeout_ms: 30_000,
            request_timeout_ms: 5_000,
            half_open_max_probes: 3,
        }
    }
}

/// Cache manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Default TTL applied when a write does not specify one
    pub default_ttl_seconds: u64,

    /// In-process tier sizing
    pub memory: MemoryCacheConfig,

    /// Remote tier connection; `None` runs memory-only
    pub redis: Option<RedisConfig>,
}

impl CacheSettings {
    /// Get default TTL as Duration
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    /// Validate cache settings
    pub fn validate(&self) -> Result<(), String> {
        if self.default_ttl_seconds == 0 {
            return Err("default_ttl_seconds must be greater than 0".to_string());
        }

        self.memory.validate()?;

        if let Some(redis) = &self.redis {
            redis.validate()?;
        }

        Ok(())
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
            memory: MemoryCacheConfig::default(),
            redis: None,
        }
    }
}

/// In-process cache tier sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries in the local tier
    pub max_entries: u64,

    /// Approximate total payload size bound in bytes
    pub max_size_bytes: u64,
}

impl MemoryCacheConfig {
    /// Validate sizing parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }

        if self.max_size_bytes == 0 {
            return Err("max_size_bytes must be greater than 0".to_string());
        }

        if self.max_size_bytes < self.max_entries {
            return Err("max_size_bytes must be at least max_entries".to_string());
        }

        Ok(())
    }
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_size_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Remote cache tier connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Connection URL (`redis://[user:pass@]host:port[/db]`)
    pub url: String,

    /// Timeout for establishing the initial connection
    #[serde(default = "RedisConfig::default_connection_timeout_seconds")]
    pub connection_timeout_seconds: u64,
}

impl RedisConfig {
    fn default_connection_timeout_seconds() -> u64 {
        5
    }

    /// Get connection timeout as Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }

    /// Validate connection settings
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("redis url must not be empty".to_string());
        }

        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err("redis url must start with redis:// or rediss://".to_string());
        }

        if self.connection_timeout_seconds == 0 {
            return Err("connection_timeout_seconds must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Default retry policy settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum attempts including the first call
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay
    pub max_delay_ms: u64,

    /// Multiplier applied per additional attempt
    pub backoff_factor: f64,

    /// Randomize each delay into the 50-100% band
    pub jitter: bool,
}

impl RetrySettings {
    /// Get initial delay as Duration
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Get maximum delay as Duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Convert to the resilience module's runtime policy
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay(),
            max_delay: self.max_delay(),
            backoff_factor: self.backoff_factor,
            jitter: self.jitter,
        }
    }

    /// Validate retry settings
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if self.max_attempts > 20 {
            return Err("max_attempts should not exceed 20".to_string());
        }

        if self.initial_delay_ms == 0 {
            return Err("initial_delay_ms must be greater than 0".to_string());
        }

        if self.max_delay_ms < self.initial_delay_ms {
            return Err("max_delay_ms must be at least initial_delay_ms".to_string());
        }

        if self.backoff_factor < 1.0 {
            return Err("backoff_factor must be at least 1.0".to_string());
        }

        Ok(())
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}
