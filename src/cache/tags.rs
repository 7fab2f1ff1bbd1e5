//! Tag index for group invalidation.
//!
//! Maps each tag to the set of keys whose current entry carries it, so
//! invalidating a tag touches only its members instead of scanning every
//! key. Backed by a sharded concurrent map: readers and writers contend
//! only per shard, keeping the cache read path off any global lock.
//!
//! Invariant: a key is listed under a tag iff the live entry for that key
//! carries the tag. Entry removal (explicit delete, eviction, expiry) must
//! unlink the key from every tag it held, and tags left empty are dropped.

use dashmap::DashMap;
use std::collections::HashSet;

/// Concurrent tag → key-set index
#[derive(Debug, Default)]
pub struct TagIndex {
    index: DashMap<String, HashSet<String>>,
}

impl TagIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            index: DashMap::new(),
        }
    }

    /// Link a key under every tag of its new entry, unlinking stale
    /// associations left by the entry it replaces.
    pub fn replace(
        &self,
        key: &str,
        previous_tags: Option<&HashSet<String>>,
        new_tags: &HashSet<String>,
    ) {
        if let Some(previous) = previous_tags {
            for tag in previous.difference(new_tags) {
                self.unlink(tag, key);
            }
        }

        for tag in new_tags {
            self.index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Remove a key from every tag its entry carried
    pub fn remove_entry(&self, key: &str, tags: &HashSet<String>) {
        for tag in tags {
            self.unlink(tag, key);
        }
    }

    /// Union of the key sets for the given tags
    pub fn keys_for_tags<S: AsRef<str>>(&self, tags: &[S]) -> HashSet<String> {
        let mut keys = HashSet::new();
        for tag in tags {
            if let Some(entry) = self.index.get(tag.as_ref()) {
                keys.extend(entry.iter().cloned());
            }
        }
        keys
    }

    /// Number of tags currently tracked
    pub fn tag_count(&self) -> usize {
        self.index.len()
    }

    /// Remove one key from one tag, dropping the tag's row once empty.
    ///
    /// Rows are never removed wholesale: a concurrent write may have just
    /// linked a fresh key under the same tag, and that link must survive.
    pub fn unlink(&self, tag: &str, key: &str) {
        if let Some(mut entry) = self.index.get_mut(tag) {
            entry.remove(key);
        }
        // Guard must be dropped before removal to avoid deadlocking the shard
        self.index.remove_if(tag, |_, keys| keys.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags_of(tags: &[&str]) -> HashSet<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_replace_links_key_under_tags() {
        let index = TagIndex::new();
        index.replace("product:1", None, &tags_of(&["catalog", "shop:1"]));

        let keys = index.keys_for_tags(&["catalog"]);
        assert!(keys.contains("product:1"));
        assert_eq!(index.tag_count(), 2);
    }

    #[test]
    fn test_replace_unlinks_stale_tags() {
        let index = TagIndex::new();
        index.replace("product:1", None, &tags_of(&["catalog", "sale"]));
        index.replace(
            "product:1",
            Some(&tags_of(&["catalog", "sale"])),
            &tags_of(&["catalog"]),
        );

        assert!(index.keys_for_tags(&["sale"]).is_empty());
        assert!(index.keys_for_tags(&["catalog"]).contains("product:1"));
        // The emptied tag row is dropped entirely
        assert_eq!(index.tag_count(), 1);
    }

    #[test]
    fn test_remove_entry_unlinks_everywhere() {
        let index = TagIndex::new();
        index.replace("product:1", None, &tags_of(&["catalog", "shop:1"]));
        index.replace("product:2", None, &tags_of(&["catalog"]));

        index.remove_entry("product:1", &tags_of(&["catalog", "shop:1"]));

        assert!(index.keys_for_tags(&["shop:1"]).is_empty());
        let remaining = index.keys_for_tags(&["catalog"]);
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains("product:2"));
        assert_eq!(index.tag_count(), 1);
    }

    #[test]
    fn test_keys_for_tags_unions() {
        let index = TagIndex::new();
        index.replace("a", None, &tags_of(&["t1"]));
        index.replace("b", None, &tags_of(&["t2"]));
        index.replace("c", None, &tags_of(&["t1", "t2"]));

        let keys = index.keys_for_tags(&["t1", "t2"]);
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_unlink_drops_emptied_rows_only() {
        let index = TagIndex::new();
        index.replace("a", None, &tags_of(&["t1"]));
        index.replace("b", None, &tags_of(&["t1"]));

        index.unlink("t1", "a");
        assert_eq!(index.tag_count(), 1);
        assert!(index.keys_for_tags(&["t1"]).contains("b"));

        index.unlink("t1", "b");
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn test_untagged_key_is_invisible() {
        let index = TagIndex::new();
        index.replace("plain", None, &HashSet::new());

        assert_eq!(index.tag_count(), 0);
        assert!(index.keys_for_tags(&["anything"]).is_empty());
    }

    #[test]
    fn test_concurrent_mutation_is_safe() {
        use std::sync::Arc;

        let index = Arc::new(TagIndex::new());
        let mut handles = Vec::new();

        for worker in 0..8 {
            let index = Arc::clone(&index);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("key:{worker}:{i}");
                    index.replace(&key, None, &tags_of(&["shared", "t1"]));
                    index.remove_entry(&key, &tags_of(&["shared", "t1"]));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // Every link was balanced by an unlink
        assert!(index.keys_for_tags(&["shared"]).is_empty());
    }
}
