//! Cache error types

use thiserror::Error;

/// Errors that can occur during cache tier operations.
///
/// These stay internal to the cache plumbing: the manager absorbs remote
/// tier failures (degrading to memory-only) and treats local decode
/// failures as misses, so callers of [`crate::cache::CacheManager`] never
/// see this type.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to connect to the remote cache backend
    #[error("Cache connection error: {0}")]
    ConnectionError(String),

    /// Failed to serialize or deserialize a cache value
    #[error("Cache serialization error: {0}")]
    SerializationError(String),

    /// Cache operation timed out
    #[error("Cache operation timed out: {0}")]
    Timeout(String),

    /// Generic backend error
    #[error("Cache backend error: {0}")]
    BackendError(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
