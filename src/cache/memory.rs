//! In-process cache tier.
//!
//! Bounded local store for [`CacheEntry`] values: approximately
//! least-recently-used, weighted by payload size, with per-entry lifetimes.
//! Entries live until the end of their stale-serve window so
//! stale-while-revalidate reads stay servable; logical freshness is checked
//! by the manager against the entry itself.
//!
//! Eviction (capacity or lifetime) unlinks the victim from the tag index in
//! the eviction listener, on the thread that triggered the eviction.
//! Explicit removals and replacements are excluded there: the manager
//! maintains the index inline for those, where it can diff old and new tag
//! sets.

use crate::cache::entry::CacheEntry;
use crate::cache::tags::TagIndex;
use crate::config::MemoryCacheConfig;
use moka::notification::RemovalCause;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-entry lifetime: entries are purged at the end of their stale window
/// (or at expiry when no stale window is configured).
struct EntryLifetime;

impl Expiry<String, Arc<CacheEntry>> for EntryLifetime {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(
            value
                .hard_deadline()
                .saturating_duration_since(Instant::now()),
        )
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(
            value
                .hard_deadline()
                .saturating_duration_since(Instant::now()),
        )
    }
}

/// Bounded in-process store for cache entries
pub struct MemoryStore {
    cache: moka::sync::Cache<String, Arc<CacheEntry>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("max_capacity", &self.cache.policy().max_capacity())
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

impl MemoryStore {
    /// Create a bounded store wired to the given tag index.
    ///
    /// Capacity is weighted by approximate entry size, with a per-entry
    /// minimum weight of `max_size_bytes / max_entries` so a single bound
    /// enforces both the byte and item limits.
    pub fn new(config: &MemoryCacheConfig, tags: Arc<TagIndex>) -> Self {
        let min_entry_weight = (config.max_size_bytes / config.max_entries).max(1);

        let cache = moka::sync::Cache::builder()
            .max_capacity(config.max_size_bytes)
            .weigher(move |key: &String, entry: &Arc<CacheEntry>| {
                entry.weight(key).max(min_entry_weight).min(u64::from(u32::MAX)) as u32
            })
            .expire_after(EntryLifetime)
            .eviction_listener(move |key: Arc<String>, entry: Arc<CacheEntry>, cause| {
                match cause {
                    RemovalCause::Expired | RemovalCause::Size => {
                        debug!(key = %key, cause = ?cause, "Local cache entry evicted");
                        tags.remove_entry(&key, entry.tags());
                    }
                    // Explicit removal and replacement maintain the index
                    // inline at the call site
                    RemovalCause::Explicit | RemovalCause::Replaced => {}
                }
            })
            .build();

        debug!(
            max_entries = config.max_entries,
            max_size_bytes = config.max_size_bytes,
            "In-process cache tier created"
        );

        Self { cache }
    }

    /// Look up an entry, updating its recency on a hit
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.cache.get(key)
    }

    /// Look up an entry without touching recency
    pub fn peek(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Insert or replace the entry for a key
    pub fn insert(&self, key: String, entry: Arc<CacheEntry>) {
        self.cache.insert(key, entry);
    }

    /// Remove and return the entry for a key
    pub fn remove(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.cache.remove(key)
    }

    /// Number of entries currently resident (approximate until maintenance
    /// runs)
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Total weighted size of resident entries
    pub fn weighted_size(&self) -> u64 {
        self.cache.weighted_size()
    }

    /// Run pending maintenance (eviction, expiry). Deterministic hook for
    /// tests; production relies on moka's background housekeeping.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CacheWriteOptions;

    fn entry_with_tags(value: &str, tags: &[&str]) -> Arc<CacheEntry> {
        let options = CacheWriteOptions::ttl(Duration::from_secs(60))
            .with_tags(tags.iter().copied());
        Arc::new(CacheEntry::encode(&value, Duration::from_secs(60), &options).unwrap())
    }

    fn small_store(tags: Arc<TagIndex>) -> MemoryStore {
        MemoryStore::new(
            &MemoryCacheConfig {
                max_entries: 1000,
                max_size_bytes: 1024 * 1024,
            },
            tags,
        )
    }

    #[test]
    fn test_insert_get_remove() {
        let tags = Arc::new(TagIndex::new());
        let store = small_store(Arc::clone(&tags));

        store.insert("k".to_string(), entry_with_tags("v", &[]));
        assert!(store.get("k").is_some());

        let removed = store.remove("k");
        assert!(removed.is_some());
        assert!(store.get("k").is_none());
    }

    #[test]
    fn test_capacity_eviction_cleans_tag_index() {
        let tags = Arc::new(TagIndex::new());
        // Room for roughly two entries: min weight is max_size/max_entries
        let store = MemoryStore::new(
            &MemoryCacheConfig {
                max_entries: 2,
                max_size_bytes: 2048,
            },
            Arc::clone(&tags),
        );

        for i in 0..4 {
            let key = format!("key{i}");
            let entry = entry_with_tags("value", &["group"]);
            tags.replace(&key, None, entry.tags());
            store.insert(key, entry);
        }

        store.run_pending_tasks();
        assert!(store.entry_count() <= 2);

        // Every key still indexed under the tag must still be resident
        for key in tags.keys_for_tags(&["group"]) {
            assert!(store.peek(&key), "evicted key {key} left in tag index");
        }
    }

    #[test]
    fn test_lifetime_eviction_cleans_tag_index() {
        let tags = Arc::new(TagIndex::new());
        let store = small_store(Arc::clone(&tags));

        let options = CacheWriteOptions::ttl(Duration::from_millis(20)).with_tags(["flash-sale"]);
        let entry = Arc::new(
            CacheEntry::encode(&"v", Duration::from_millis(20), &options).unwrap(),
        );
        tags.replace("deal", None, entry.tags());
        store.insert("deal".to_string(), entry);

        assert_eq!(tags.tag_count(), 1);

        std::thread::sleep(Duration::from_millis(50));
        store.run_pending_tasks();

        assert!(store.get("deal").is_none());
        assert_eq!(tags.tag_count(), 0);
    }

    #[test]
    fn test_entry_survives_to_stale_deadline() {
        let tags = Arc::new(TagIndex::new());
        let store = small_store(tags);

        let options = CacheWriteOptions::ttl(Duration::from_millis(20))
            .with_stale_window(Duration::from_millis(200));
        let entry = Arc::new(
            CacheEntry::encode(&"v", Duration::from_millis(20), &options).unwrap(),
        );
        store.insert("k".to_string(), entry);

        // Past expiry but within the stale window: still resident
        std::thread::sleep(Duration::from_millis(50));
        store.run_pending_tasks();
        let resident = store.get("k").expect("entry purged before stale deadline");
        assert!(!resident.is_fresh(Instant::now()));
        assert!(resident.is_stale_servable(Instant::now()));
    }

    #[test]
    fn test_replacement_does_not_fire_listener_cleanup() {
        let tags = Arc::new(TagIndex::new());
        let store = small_store(Arc::clone(&tags));

        let first = entry_with_tags("v1", &["catalog"]);
        tags.replace("k", None, first.tags());
        store.insert("k".to_string(), first);

        // Replacement keeps the same tag; inline maintenance is a no-op and
        // the listener must not unlink it
        let second = entry_with_tags("v2", &["catalog"]);
        let previous = store.get("k");
        tags.replace("k", previous.as_deref().map(|p| p.tags()), second.tags());
        store.insert("k".to_string(), second);
        store.run_pending_tasks();

        assert!(tags.keys_for_tags(&["catalog"]).contains("k"));
    }
}
