//! Integration tests for two-tier cache semantics with the remote tier
//! absent or unreachable.

use std::time::Duration;
use storefront_core::cache::{CacheManager, CacheWriteOptions};
use storefront_core::config::{
    CacheSettings, CircuitBreakerSettings, MemoryCacheConfig, RedisConfig,
};
use storefront_core::resilience::CircuitBreakerRegistry;
use tokio::time::sleep;

fn settings() -> CacheSettings {
    CacheSettings {
        default_ttl_seconds: 60,
        memory: MemoryCacheConfig {
            max_entries: 1_000,
            max_size_bytes: 4 * 1024 * 1024,
        },
        redis: None,
    }
}

#[tokio::test]
async fn test_round_trip_law_with_remote_unavailable() {
    storefront_core::logging::init_tracing();

    // Remote configured but dead: the manager must degrade to memory-only
    // and still satisfy reads from local writes
    let registry = CircuitBreakerRegistry::new(CircuitBreakerSettings::default());
    let cache = CacheManager::new(
        &CacheSettings {
            redis: Some(RedisConfig {
                url: "redis://127.0.0.1:1".to_string(),
                connection_timeout_seconds: 1,
            }),
            ..settings()
        },
        &registry,
    )
    .await;

    cache
        .set("cart:7", &vec!["sku-1", "sku-2"], CacheWriteOptions::new())
        .await;

    let value: Option<Vec<String>> = cache.get("cart:7").await;
    assert_eq!(
        value,
        Some(vec!["sku-1".to_string(), "sku-2".to_string()])
    );
}

#[tokio::test]
async fn test_tagged_write_then_invalidate_scenario() {
    let cache = CacheManager::memory_only(&settings());

    cache
        .set(
            "k",
            &"v1".to_string(),
            CacheWriteOptions::ttl(Duration::from_millis(100)).with_tags(["shop:1"]),
        )
        .await;

    // Within TTL the exact written value is served
    sleep(Duration::from_millis(50)).await;
    let value: Option<String> = cache.get("k").await;
    assert_eq!(value.as_deref(), Some("v1"));

    cache.invalidate_by_tags(&["shop:1"]).await;

    // Immediately after invalidation the key is gone
    let value: Option<String> = cache.get("k").await;
    assert!(value.is_none());
}

#[tokio::test]
async fn test_stale_while_revalidate_progression() {
    let cache = CacheManager::memory_only(&settings());

    cache
        .set(
            "inventory:42",
            &17u32,
            CacheWriteOptions::ttl(Duration::from_millis(40))
                .with_stale_window(Duration::from_millis(120)),
        )
        .await;

    // Fresh
    assert_eq!(cache.get::<u32>("inventory:42").await, Some(17));

    // Expired but inside the stale window: previous value
    sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.get::<u32>("inventory:42").await, Some(17));

    // Past the stale window: null
    sleep(Duration::from_millis(120)).await;
    assert_eq!(cache.get::<u32>("inventory:42").await, None);
}

#[tokio::test]
async fn test_multi_tag_invalidation_unions_keys() {
    let cache = CacheManager::memory_only(&settings());

    cache
        .set("a", &1u32, CacheWriteOptions::new().with_tags(["t1"]))
        .await;
    cache
        .set("b", &2u32, CacheWriteOptions::new().with_tags(["t2"]))
        .await;
    cache
        .set("c", &3u32, CacheWriteOptions::new().with_tags(["t1", "t2"]))
        .await;
    cache.set("d", &4u32, CacheWriteOptions::new()).await;

    cache.invalidate_by_tags(&["t1", "t2"]).await;

    assert!(cache.get::<u32>("a").await.is_none());
    assert!(cache.get::<u32>("b").await.is_none());
    assert!(cache.get::<u32>("c").await.is_none());
    assert_eq!(cache.get::<u32>("d").await, Some(4));
    assert_eq!(cache.stats().tag_count, 0);
}

#[tokio::test]
async fn test_stats_surface() {
    let cache = CacheManager::memory_only(&settings());

    cache
        .set(
            "product:1",
            &"widget".to_string(),
            CacheWriteOptions::new().with_tags(["catalog"]),
        )
        .await;

    let stats = cache.stats();
    assert!(!stats.remote_connected);
    assert!(stats.breaker_state.is_none());
    assert_eq!(stats.tag_count, 1);
}

#[tokio::test]
async fn test_concurrent_writers_and_invalidators_leave_index_consistent() {
    use std::sync::Arc;

    let cache = Arc::new(CacheManager::memory_only(&settings()));
    let mut handles = Vec::new();

    for worker in 0..4 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                let key = format!("k:{worker}:{i}");
                cache
                    .set(&key, &i, CacheWriteOptions::new().with_tags(["churn"]))
                    .await;
                if i % 10 == 0 {
                    cache.invalidate_by_tags(&["churn"]).await;
                }
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    // Whatever interleaving happened, a final invalidation must leave
    // nothing reachable through the tag
    cache.invalidate_by_tags(&["churn"]).await;
    for worker in 0..4 {
        for i in 0..50 {
            let key = format!("k:{worker}:{i}");
            assert!(cache.get::<i32>(&key).await.is_none());
        }
    }
}
