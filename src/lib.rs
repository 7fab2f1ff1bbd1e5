#![allow(clippy::doc_markdown)] // Allow technical terms like Redis, TTL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Storefront Core
//!
//! Resilience and caching core for the storefront platform. The surrounding
//! application handles products, sessions, and checkout; this crate owns the
//! parts that keep it standing when a dependency degrades:
//!
//! - **Circuit breakers** that shed load from failing dependencies and
//!   probe for recovery, shared process-wide through a registry
//! - **A two-tier cache** (bounded in-process store plus a shared Redis
//!   tier) where every remote access runs behind a dedicated breaker, so a
//!   degraded remote cache means memory-only operation instead of
//!   cascading failures
//! - **Retry with backoff** for idempotent setup calls
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storefront_core::cache::{CacheManager, CacheWriteOptions};
//! use storefront_core::config::CoreConfig;
//! use storefront_core::resilience::CircuitBreakerRegistry;
//! use std::time::Duration;
//!
//! # #[derive(serde::Serialize, serde::Deserialize)]
//! # struct Product { id: u64 }
//! # async fn example() {
//! let config = CoreConfig::load().expect("valid configuration");
//! let registry = Arc::new(CircuitBreakerRegistry::new(config.circuit_breakers.clone()));
//! let cache = CacheManager::new(&config.cache, &registry).await;
//!
//! let options = CacheWriteOptions::ttl(Duration::from_secs(300))
//!     .with_tags(["catalog", "shop:1"])
//!     .with_stale_window(Duration::from_secs(60));
//! cache.set("product:42", &Product { id: 42 }, options).await;
//!
//! let product: Option<Product> = cache.get("product:42").await;
//! cache.invalidate_by_tags(&["shop:1"]).await;
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`resilience`] - circuit breaker, breaker registry, retry with backoff
//! - [`cache`] - two-tier cache manager, tag index, cache tiers
//! - [`config`] - configuration structs, validation, and file/env loading
//! - [`logging`] - environment-aware tracing initialization
//! - [`errors`] - top-level error type for assembly failures

pub mod cache;
pub mod config;
pub mod errors;
pub mod logging;
pub mod resilience;

pub use cache::{CacheManager, CacheStats, CacheWriteOptions};
pub use config::CoreConfig;
pub use errors::{CoreResult, StorefrontCoreError};
pub use resilience::{
    retry_with_backoff, retry_with_backoff_if, CircuitBreaker, CircuitBreakerError,
    CircuitBreakerRegistry, CircuitState, Fallback, RetryPolicy,
};
