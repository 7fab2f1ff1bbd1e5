//! Cache entry representation and payload codecs.
//!
//! Entries are immutable: a write replaces the whole entry. The payload is
//! the serde_json serialization of the cached value, optionally
//! lz4-compressed, with a content fingerprint computed over the
//! uncompressed bytes. Expiry is tracked twice: as monotonic instants for
//! local freshness checks and as epoch milliseconds for the remote-tier
//! envelope, which must survive transport between processes.

use crate::cache::errors::{CacheError, CacheResult};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::Hasher;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Options for a cache write
#[derive(Debug, Clone, Default)]
pub struct CacheWriteOptions {
    /// Time-to-live; `None` uses the manager's configured default
    pub ttl: Option<Duration>,

    /// Window after expiry during which the previous value may still be
    /// served (stale-while-revalidate)
    pub stale_while_revalidate: Option<Duration>,

    /// Tags for group invalidation
    pub tags: Vec<String>,

    /// Compress the payload with lz4
    pub compress: bool,
}

impl CacheWriteOptions {
    /// Options with the manager's default TTL and nothing else
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with an explicit TTL
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    /// Serve the previous value for `window` after expiry
    pub fn with_stale_window(mut self, window: Duration) -> Self {
        self.stale_while_revalidate = Some(window);
        self
    }

    /// Attach tags for group invalidation
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Compress the payload with lz4
    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }
}

/// Get current epoch milliseconds from SystemTime
#[inline]
fn epoch_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Content fingerprint over the uncompressed serialized payload
fn fingerprint_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

/// An immutable cached value with expiry, tags, and a content fingerprint
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Serialized value, lz4-compressed when `compressed` is set
    payload: Vec<u8>,

    /// Whether `payload` is lz4-compressed
    compressed: bool,

    /// Monotonic freshness deadline
    expires_at: Instant,

    /// Monotonic end of the stale-serve window, when configured
    stale_until: Option<Instant>,

    /// Wall-clock freshness deadline, carried in the remote envelope
    expires_at_epoch_ms: u64,

    /// Wall-clock end of the stale-serve window
    stale_until_epoch_ms: Option<u64>,

    /// Tags for group invalidation; an entry with no tags is unreachable
    /// via tag invalidation
    tags: HashSet<String>,

    /// Content hash of the uncompressed serialized value
    fingerprint: u64,
}

impl CacheEntry {
    /// Serialize a value into a new entry
    pub(crate) fn encode<T: Serialize>(
        value: &T,
        ttl: Duration,
        options: &CacheWriteOptions,
    ) -> CacheResult<Self> {
        let json = serde_json::to_vec(value)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;
        let fingerprint = fingerprint_bytes(&json);

        let payload = if options.compress {
            compress_prepend_size(&json)
        } else {
            json
        };

        let now = Instant::now();
        let now_epoch_ms = epoch_millis_now();
        let expires_at = now + ttl;
        let expires_at_epoch_ms = now_epoch_ms + ttl.as_millis() as u64;
        let stale_until = options.stale_while_revalidate.map(|w| expires_at + w);
        let stale_until_epoch_ms = options
            .stale_while_revalidate
            .map(|w| expires_at_epoch_ms + w.as_millis() as u64);

        Ok(Self {
            payload,
            compressed: options.compress,
            expires_at,
            stale_until,
            expires_at_epoch_ms,
            stale_until_epoch_ms,
            tags: options.tags.iter().cloned().collect(),
            fingerprint,
        })
    }

    /// Rebuild a local entry from a remote envelope.
    ///
    /// Returns `None` when the envelope has already expired; the remaining
    /// wall-clock lifetime is mapped onto the local monotonic clock.
    pub(crate) fn from_remote(envelope: RemoteEnvelope) -> Option<Self> {
        let now_epoch_ms = epoch_millis_now();
        if envelope.expires_at_epoch_ms <= now_epoch_ms {
            return None;
        }

        let now = Instant::now();
        let remaining = Duration::from_millis(envelope.expires_at_epoch_ms - now_epoch_ms);
        let stale_until = envelope
            .stale_until_epoch_ms
            .filter(|&s| s > now_epoch_ms)
            .map(|s| now + Duration::from_millis(s - now_epoch_ms));

        let json = match serde_json::to_vec(&envelope.value) {
            Ok(json) => json,
            Err(_) => return None,
        };

        Some(Self {
            payload: json,
            compressed: false,
            expires_at: now + remaining,
            stale_until,
            expires_at_epoch_ms: envelope.expires_at_epoch_ms,
            stale_until_epoch_ms: envelope.stale_until_epoch_ms,
            tags: envelope.tags.into_iter().collect(),
            fingerprint: envelope.fingerprint,
        })
    }

    /// Deserialize the cached value
    pub(crate) fn decode<T: DeserializeOwned>(&self) -> CacheResult<T> {
        let bytes: Cow<'_, [u8]> = if self.compressed {
            Cow::Owned(
                decompress_size_prepended(&self.payload)
                    .map_err(|e| CacheError::SerializationError(e.to_string()))?,
            )
        } else {
            Cow::Borrowed(&self.payload)
        };

        serde_json::from_slice(&bytes).map_err(|e| CacheError::SerializationError(e.to_string()))
    }

    /// Build the envelope written to the remote tier
    pub(crate) fn to_remote_envelope(&self) -> CacheResult<RemoteEnvelope> {
        let bytes: Cow<'_, [u8]> = if self.compressed {
            Cow::Owned(
                decompress_size_prepended(&self.payload)
                    .map_err(|e| CacheError::SerializationError(e.to_string()))?,
            )
        } else {
            Cow::Borrowed(&self.payload)
        };

        let value = serde_json::from_slice(&bytes)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;

        Ok(RemoteEnvelope {
            value,
            expires_at_epoch_ms: self.expires_at_epoch_ms,
            stale_until_epoch_ms: self.stale_until_epoch_ms,
            tags: self.tags.iter().cloned().collect(),
            fingerprint: self.fingerprint,
        })
    }

    /// True while the entry is within its TTL
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// True when expired but still within the stale-serve window
    pub fn is_stale_servable(&self, now: Instant) -> bool {
        !self.is_fresh(now) && self.stale_until.is_some_and(|until| now < until)
    }

    /// The instant after which the entry serves no purpose at all
    pub(crate) fn hard_deadline(&self) -> Instant {
        self.stale_until.unwrap_or(self.expires_at)
    }

    /// Tags attached to this entry
    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    /// Content fingerprint of the serialized value
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Approximate memory footprint used for weighted eviction
    pub(crate) fn weight(&self, key: &str) -> u64 {
        let tag_bytes: usize = self.tags.iter().map(|t| t.len()).sum();
        (self.payload.len() + key.len() + tag_bytes + 64) as u64
    }
}

/// Wire format for the remote tier: the value plus enough metadata to
/// rebuild a local entry with consistent expiry on any instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RemoteEnvelope {
    pub value: serde_json::Value,
    pub expires_at_epoch_ms: u64,
    pub stale_until_epoch_ms: Option<u64>,
    pub tags: Vec<String>,
    pub fingerprint: u64,
}
