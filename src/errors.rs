//! Error types for the storefront resilience core.

use thiserror::Error;

/// Top-level error type for configuration and wiring failures.
///
/// Operational errors stay within their own modules:
/// [`crate::resilience::CircuitBreakerError`] for protected calls and
/// [`crate::cache::CacheError`] for cache tier plumbing. This enum covers
/// the failures a host application sees while assembling the core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorefrontCoreError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Cache error: {0}")]
    CacheError(String),
    #[error("Circuit breaker error: {0}")]
    CircuitBreakerError(String),
}

impl From<serde_json::Error> for StorefrontCoreError {
    fn from(error: serde_json::Error) -> Self {
        StorefrontCoreError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<crate::cache::CacheError> for StorefrontCoreError {
    fn from(error: crate::cache::CacheError) -> Self {
        StorefrontCoreError::CacheError(error.to_string())
    }
}

/// Result type for core assembly operations
pub type CoreResult<T> = Result<T, StorefrontCoreError>;
