//! Two-tier cache manager.
//!
//! Serves reads from a bounded in-process tier first, falling back to a
//! shared remote tier reached exclusively through the remote-cache circuit
//! breaker. A degraded or unreachable remote store narrows the cache to
//! memory-only operation; it never surfaces errors to callers. Writes land
//! locally first and replicate to the remote tier in the background.
//!
//! Failure semantics: local-tier errors are programming bugs and have no
//! error path in this API; remote-tier errors are always recoverable and
//! are logged and absorbed here.

use crate::cache::entry::{CacheEntry, CacheWriteOptions, RemoteEnvelope};
use crate::cache::errors::CacheError;
use crate::cache::memory::MemoryStore;
use crate::cache::remote::RedisRemoteCache;
use crate::cache::tags::TagIndex;
use crate::config::CacheSettings;
use crate::resilience::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Registry name of the breaker protecting the remote tier
pub const REMOTE_CACHE_BREAKER: &str = "remote-cache";

/// Point-in-time cache observability snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Entries resident in the local tier
    pub memory_entries: u64,

    /// Approximate weighted size of the local tier in bytes
    pub memory_size_bytes: u64,

    /// Whether the remote tier is configured and its breaker admits calls
    pub remote_connected: bool,

    /// Remote-cache breaker state; `None` when running memory-only
    pub breaker_state: Option<CircuitState>,

    /// Tags currently tracked by the index
    pub tag_count: usize,
}

/// Remote tier plus the breaker every call to it must pass through
struct RemoteTier {
    service: RedisRemoteCache,
    breaker: Arc<CircuitBreaker>,
}

/// Two-tier cache with tag invalidation and breaker-protected remote access
pub struct CacheManager {
    memory: MemoryStore,
    tags: Arc<TagIndex>,
    remote: Option<RemoteTier>,
    default_ttl: Duration,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("memory", &self.memory)
            .field("remote_configured", &self.remote.is_some())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl CacheManager {
    /// Create a cache manager from configuration with graceful degradation.
    ///
    /// A configured-but-unreachable remote tier logs a warning and falls
    /// back to memory-only; startup never fails on cache plumbing. The
    /// remote-cache breaker is taken from the shared registry so its state
    /// is visible alongside every other protected dependency.
    pub async fn new(settings: &CacheSettings, registry: &CircuitBreakerRegistry) -> Self {
        let tags = Arc::new(TagIndex::new());
        let memory = MemoryStore::new(&settings.memory, Arc::clone(&tags));

        let remote = match &settings.redis {
            Some(redis_config) => match RedisRemoteCache::connect(redis_config).await {
                Ok(service) => {
                    let breaker = registry.get_or_create(REMOTE_CACHE_BREAKER).await;
                    info!("Remote cache tier initialized");
                    Some(RemoteTier { service, breaker })
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Failed to connect to remote cache, running memory-only (graceful degradation)"
                    );
                    None
                }
            },
            None => {
                info!("No remote cache configured, running memory-only");
                None
            }
        };

        Self {
            memory,
            tags,
            remote,
            default_ttl: settings.default_ttl(),
        }
    }

    /// Create a memory-only manager, ignoring any remote configuration
    pub fn memory_only(settings: &CacheSettings) -> Self {
        let tags = Arc::new(TagIndex::new());
        let memory = MemoryStore::new(&settings.memory, Arc::clone(&tags));

        Self {
            memory,
            tags,
            remote: None,
            default_ttl: settings.default_ttl(),
        }
    }

    /// Look up a cached value.
    ///
    /// Local fresh hit wins; otherwise the remote tier is consulted through
    /// its breaker and a hit backfills the local tier. When both miss, an
    /// expired local entry still inside its stale window is served as a
    /// last resort. Decode failures are treated as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let local = self.memory.get(key);

        if let Some(entry) = &local {
            if entry.is_fresh(Instant::now()) {
                match entry.decode::<T>() {
                    Ok(value) => {
                        debug!(key = key, tier = "memory", "Cache HIT");
                        return Some(value);
                    }
                    Err(e) => {
                        warn!(
                            key = key,
                            error = %e,
                            "Failed to decode local cache entry, treating as miss"
                        );
                    }
                }
            }
        }

        if let Some(remote) = &self.remote {
            match remote.breaker.execute(|| remote.service.get(key)).await {
                Ok(Some(raw)) => {
                    if let Some(entry) = self.backfill_from_remote(key, &raw, local.as_ref()) {
                        match entry.decode::<T>() {
                            Ok(value) => {
                                debug!(key = key, tier = "remote", "Cache HIT");
                                return Some(value);
                            }
                            Err(e) => {
                                warn!(
                                    key = key,
                                    error = %e,
                                    "Failed to decode remote cache entry, treating as miss"
                                );
                            }
                        }
                    }
                }
                Ok(None) => {
                    debug!(key = key, tier = "remote", "Cache MISS");
                }
                Err(error) => {
                    debug!(
                        key = key,
                        error = %error,
                        "Remote cache read degraded to memory-only"
                    );
                }
            }
        }

        if let Some(entry) = local {
            if entry.is_stale_servable(Instant::now()) {
                if let Ok(value) = entry.decode::<T>() {
                    debug!(key = key, "Serving stale cache entry pending refresh");
                    return Some(value);
                }
            }
        }

        None
    }

    /// Store a value.
    ///
    /// The local tier and tag index are updated unconditionally; the remote
    /// write happens in the background through the breaker and any
    /// rejection degrades silently to memory-only. A write whose content
    /// fingerprint matches the live entry skips the remote write.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, options: CacheWriteOptions) {
        let ttl = options.ttl.unwrap_or(self.default_ttl);
        let entry = match CacheEntry::encode(value, ttl, &options) {
            Ok(entry) => Arc::new(entry),
            Err(e) => {
                warn!(key = key, error = %e, "Failed to serialize cache value, dropping write");
                return;
            }
        };

        let previous = self.memory.get(key);
        let unchanged = previous
            .as_deref()
            .is_some_and(|p| p.fingerprint() == entry.fingerprint());

        // Insert before updating the index: a concurrent tag invalidation
        // then either sees the key already indexed and removes it, or misses
        // it entirely and leaves the fresh link intact. The index never ends
        // up without a link for a resident tagged entry.
        self.memory.insert(key.to_string(), Arc::clone(&entry));
        self.tags
            .replace(key, previous.as_deref().map(|p| p.tags()), entry.tags());
        debug!(key = key, ttl_ms = ttl.as_millis() as u64, "Cache SET");

        let Some(remote) = &self.remote else {
            return;
        };

        if unchanged {
            debug!(key = key, "Content fingerprint unchanged, skipping remote write");
            return;
        }

        let payload = match entry.to_remote_envelope().and_then(|envelope| {
            serde_json::to_string(&envelope)
                .map_err(|e| CacheError::SerializationError(e.to_string()))
        }) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to build remote cache envelope");
                return;
            }
        };

        let breaker = Arc::clone(&remote.breaker);
        let service = remote.service.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(error) = breaker.execute(|| service.set(&key, &payload, ttl)).await {
                debug!(
                    key = %key,
                    error = %error,
                    "Remote cache write degraded to memory-only"
                );
            }
        });
    }

    /// Remove a key from both tiers
    pub async fn delete(&self, key: &str) {
        if let Some(entry) = self.memory.remove(key) {
            self.tags.remove_entry(key, entry.tags());
        }
        debug!(key = key, "Cache DEL");

        if let Some(remote) = &self.remote {
            if let Err(error) = remote.breaker.execute(|| remote.service.delete(key)).await {
                debug!(
                    key = key,
                    error = %error,
                    "Remote cache delete degraded to memory-only"
                );
            }
        }
    }

    /// Remove every key carrying any of the given tags from both tiers.
    ///
    /// At-least-once under concurrency: a key re-written while the
    /// invalidation is in flight may or may not survive, but the tag index
    /// is left consistent either way.
    pub async fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) {
        let keys = self.tags.keys_for_tags(tags);

        for key in &keys {
            if let Some(entry) = self.memory.remove(key) {
                self.tags.remove_entry(key, entry.tags());
            } else {
                // The entry raced away (expiry, eviction, concurrent
                // delete); unlink the requested tags so no dangling link
                // survives
                for tag in tags {
                    self.tags.unlink(tag.as_ref(), key);
                }
            }
        }

        debug!(
            tag_count = tags.len(),
            key_count = keys.len(),
            "Invalidated tagged cache entries locally"
        );

        if let Some(remote) = &self.remote {
            if !keys.is_empty() {
                let key_vec: Vec<String> = keys.into_iter().collect();
                match remote
                    .breaker
                    .execute(|| remote.service.delete_many(&key_vec))
                    .await
                {
                    Ok(deleted) => {
                        debug!(deleted = deleted, "Invalidated tagged entries in remote cache");
                    }
                    Err(error) => {
                        debug!(
                            error = %error,
                            "Remote cache invalidation degraded to memory-only"
                        );
                    }
                }
            }
        }
    }

    /// Observability snapshot for health endpoints
    pub fn stats(&self) -> CacheStats {
        let breaker_state = self.remote.as_ref().map(|tier| tier.breaker.state());

        CacheStats {
            memory_entries: self.memory.entry_count(),
            memory_size_bytes: self.memory.weighted_size(),
            remote_connected: matches!(
                breaker_state,
                Some(CircuitState::Closed | CircuitState::HalfOpen)
            ),
            breaker_state,
            tag_count: self.tags.tag_count(),
        }
    }

    /// Parse a remote envelope, rebuild the local entry, and backfill the
    /// local tier and tag index. Returns `None` for expired or malformed
    /// envelopes.
    fn backfill_from_remote(
        &self,
        key: &str,
        raw: &str,
        previous: Option<&Arc<CacheEntry>>,
    ) -> Option<Arc<CacheEntry>> {
        let envelope = match serde_json::from_str::<RemoteEnvelope>(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key = key, error = %e, "Malformed remote cache envelope, ignoring");
                return None;
            }
        };

        let entry = Arc::new(CacheEntry::from_remote(envelope)?);
        self.memory.insert(key.to_string(), Arc::clone(&entry));
        self.tags
            .replace(key, previous.map(|p| p.tags()), entry.tags());

        debug!(key = key, "Backfilled local tier from remote cache");
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryCacheConfig;
    use serde::Deserialize;
    use tokio::time::sleep;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Listing {
        sku: String,
        stock: u32,
    }

    fn test_settings() -> CacheSettings {
        CacheSettings {
            default_ttl_seconds: 60,
            memory: MemoryCacheConfig {
                max_entries: 1000,
                max_size_bytes: 1024 * 1024,
            },
            redis: None,
        }
    }

    fn sample_listing() -> Listing {
        Listing {
            sku: "KB-0042".to_string(),
            stock: 7,
        }
    }

    #[tokio::test]
    async fn test_round_trip_without_remote() {
        let cache = CacheManager::memory_only(&test_settings());

        cache
            .set("listing:42", &sample_listing(), CacheWriteOptions::new())
            .await;

        let value: Option<Listing> = cache.get("listing:42").await;
        assert_eq!(value, Some(sample_listing()));
    }

    #[tokio::test]
    async fn test_miss_returns_none() {
        let cache = CacheManager::memory_only(&test_settings());
        let value: Option<Listing> = cache.get("absent").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let cache = CacheManager::memory_only(&test_settings());

        cache
            .set("listing:42", &sample_listing(), CacheWriteOptions::new())
            .await;
        let updated = Listing {
            stock: 3,
            ..sample_listing()
        };
        cache.set("listing:42", &updated, CacheWriteOptions::new()).await;

        let value: Option<Listing> = cache.get("listing:42").await;
        assert_eq!(value, Some(updated));
    }

    #[tokio::test]
    async fn test_ttl_expiry_returns_none() {
        let cache = CacheManager::memory_only(&test_settings());

        cache
            .set(
                "flash",
                &sample_listing(),
                CacheWriteOptions::ttl(Duration::from_millis(30)),
            )
            .await;

        let value: Option<Listing> = cache.get("flash").await;
        assert!(value.is_some());

        sleep(Duration::from_millis(60)).await;
        let value: Option<Listing> = cache.get("flash").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_stale_window_serves_then_expires() {
        let cache = CacheManager::memory_only(&test_settings());

        cache
            .set(
                "listing:42",
                &sample_listing(),
                CacheWriteOptions::ttl(Duration::from_millis(30))
                    .with_stale_window(Duration::from_millis(100)),
            )
            .await;

        // Expired but within the stale window: previous value is served
        sleep(Duration::from_millis(60)).await;
        let value: Option<Listing> = cache.get("listing:42").await;
        assert_eq!(value, Some(sample_listing()));

        // Past the stale window: gone
        sleep(Duration::from_millis(120)).await;
        let value: Option<Listing> = cache.get("listing:42").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let cache = CacheManager::memory_only(&test_settings());

        cache
            .set(
                "listing:42",
                &sample_listing(),
                CacheWriteOptions::new().with_tags(["catalog"]),
            )
            .await;
        cache.delete("listing:42").await;

        let value: Option<Listing> = cache.get("listing:42").await;
        assert!(value.is_none());
        assert_eq!(cache.stats().tag_count, 0);
    }

    #[tokio::test]
    async fn test_invalidate_by_tags() {
        let cache = CacheManager::memory_only(&test_settings());

        cache
            .set(
                "k",
                &"v1".to_string(),
                CacheWriteOptions::ttl(Duration::from_millis(100)).with_tags(["shop:1"]),
            )
            .await;

        let value: Option<String> = cache.get("k").await;
        assert_eq!(value.as_deref(), Some("v1"));

        cache.invalidate_by_tags(&["shop:1"]).await;

        let value: Option<String> = cache.get("k").await;
        assert!(value.is_none());
        assert_eq!(cache.stats().tag_count, 0);
    }

    #[tokio::test]
    async fn test_invalidation_touches_only_tagged_keys() {
        let cache = CacheManager::memory_only(&test_settings());

        cache
            .set(
                "tagged",
                &1u32,
                CacheWriteOptions::new().with_tags(["promo"]),
            )
            .await;
        cache.set("untagged", &2u32, CacheWriteOptions::new()).await;

        cache.invalidate_by_tags(&["promo"]).await;

        assert!(cache.get::<u32>("tagged").await.is_none());
        assert_eq!(cache.get::<u32>("untagged").await, Some(2));
    }

    #[tokio::test]
    async fn test_reset_moves_key_between_tags() {
        let cache = CacheManager::memory_only(&test_settings());

        cache
            .set("k", &1u32, CacheWriteOptions::new().with_tags(["old"]))
            .await;
        cache
            .set("k", &2u32, CacheWriteOptions::new().with_tags(["new"]))
            .await;

        // Invalidating the stale tag must not remove the re-tagged key
        cache.invalidate_by_tags(&["old"]).await;
        assert_eq!(cache.get::<u32>("k").await, Some(2));

        cache.invalidate_by_tags(&["new"]).await;
        assert!(cache.get::<u32>("k").await.is_none());
    }

    #[tokio::test]
    async fn test_decode_mismatch_is_a_miss() {
        let cache = CacheManager::memory_only(&test_settings());

        cache.set("num", &7u64, CacheWriteOptions::new()).await;

        // Stored a number; asking for a struct must miss, not error
        let value: Option<Listing> = cache.get("num").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_compressed_round_trip() {
        let cache = CacheManager::memory_only(&test_settings());
        let big = "y".repeat(50_000);

        cache
            .set("blob", &big, CacheWriteOptions::new().compressed())
            .await;

        let value: Option<String> = cache.get("blob").await;
        assert_eq!(value, Some(big));
    }

    #[tokio::test]
    async fn test_stats_memory_only() {
        let cache = CacheManager::memory_only(&test_settings());

        cache
            .set("a", &1u32, CacheWriteOptions::new().with_tags(["t"]))
            .await;

        let stats = cache.stats();
        assert!(!stats.remote_connected);
        assert!(stats.breaker_state.is_none());
        assert_eq!(stats.tag_count, 1);
    }

    #[tokio::test]
    async fn test_new_with_unreachable_remote_degrades_to_memory_only() {
        use crate::config::{CircuitBreakerSettings, RedisConfig};

        let registry = CircuitBreakerRegistry::new(CircuitBreakerSettings::default());
        let settings = CacheSettings {
            redis: Some(RedisConfig {
                url: "redis://127.0.0.1:1".to_string(),
                connection_timeout_seconds: 1,
            }),
            ..test_settings()
        };

        let cache = CacheManager::new(&settings, &registry).await;

        // Fully operational despite the dead remote
        cache.set("k", &1u32, CacheWriteOptions::new()).await;
        assert_eq!(cache.get::<u32>("k").await, Some(1));
        assert!(!cache.stats().remote_connected);
    }
}
