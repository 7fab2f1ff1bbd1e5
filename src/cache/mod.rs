//! # Two-Tier Cache
//!
//! Caching for the storefront read path: a bounded in-process tier backed
//! by a shared remote tier, with tag-based group invalidation and
//! stale-while-revalidate serving.
//!
//! ## Architecture
//!
//! ```text
//! CacheManager
//!   ├── MemoryStore        <- bounded local tier (size-weighted, ~LRU)
//!   ├── TagIndex           <- tag -> keys, sharded concurrent map
//!   └── RedisRemoteCache   <- shared remote tier
//!         └── CircuitBreaker ("remote-cache") <- every remote call
//! ```
//!
//! ## Design Decisions
//!
//! - **Graceful degradation**: remote failure or an open breaker narrows
//!   the cache to memory-only; callers never see remote errors
//! - **Best-effort remote writes**: replicated in the background, logged
//!   and absorbed on failure
//! - **Tag index over key scans**: group invalidation touches only the
//!   keys that carry a tag

pub mod entry;
pub mod errors;
pub mod manager;
pub mod memory;
pub mod remote;
pub mod tags;

pub use entry::{CacheEntry, CacheWriteOptions};
pub use errors::{CacheError, CacheResult};
pub use manager::{CacheManager, CacheStats, REMOTE_CACHE_BREAKER};
pub use memory::MemoryStore;
pub use remote::RedisRemoteCache;
pub use tags::TagIndex;
