use std::time::Duration;

use memoflight::{CacheOptions, HealthStatus, MemoCache, Trend};

use crate::utils::{setup, Probe};

#[tokio::test(start_paused = true)]
async fn test_statistics_view_is_coherent() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(CacheOptions::default(), probe.fetcher(Duration::from_millis(20)));

    for key in ["a", "b", "a", "a", "c", "b"] {
        cache.get(&key.to_string()).await.unwrap();
    }

    let stats = cache.statistics();

    assert_eq!(stats.efficiency.total_requests, 6);
    assert_eq!(stats.efficiency.misses, 3);
    assert_eq!(stats.efficiency.hits, 3);
    assert!((stats.efficiency.hit_rate - 0.5).abs() < f64::EPSILON);

    // Cached reads returned instantly, fetches took ~20ms.
    assert!(stats.performance.avg_fetch_response_time >= 20.0);
    assert!(stats.performance.avg_cached_response_time < stats.performance.avg_fetch_response_time);
    assert!(stats.performance.performance_gain > 1.0);
    assert!(stats.performance.slowest_response >= stats.performance.fastest_response);
    assert!(stats.efficiency.time_saved_ms > 0.0);

    assert_eq!(stats.inventory.total_items, 3);
    assert_eq!(stats.inventory.max_item_usage, 3);
    assert_eq!(stats.inventory.min_item_usage, 1);
    assert_eq!(stats.inventory.single_use_items, 1);

    assert_eq!(stats.health.status, HealthStatus::Excellent);
    assert!(stats.health.issues.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_temporal_view() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(CacheOptions::default(), probe.fetcher(Duration::ZERO));

    cache.get(&"a".to_string()).await.unwrap();
    tokio::time::advance(Duration::from_secs(90)).await;
    cache.get(&"a".to_string()).await.unwrap();

    let stats = cache.statistics();
    assert!(stats.temporal.uptime_ms >= 90_000);
    assert_eq!(stats.temporal.uptime, "1m 30s");
    // 2 requests in 1.5 minutes.
    assert!((stats.temporal.requests_per_minute - 2.0 / 1.5).abs() < 0.01);
    assert_eq!(stats.temporal.trend, Trend::Stable);
}

#[tokio::test(start_paused = true)]
async fn test_statistics_serialize_with_camel_case_fields() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(CacheOptions::default(), probe.fetcher(Duration::ZERO));
    cache.get(&"a".to_string()).await.unwrap();

    let json = serde_json::to_value(cache.statistics()).unwrap();

    assert!(json["efficiency"]["hitRate"].is_number());
    assert!(json["efficiency"]["timeSavedMs"].is_number());
    assert!(json["performance"]["p95ResponseTime"].is_number());
    assert!(json["operations"]["rejectedRequests"].is_number());
    assert!(json["memory"]["currentUsageBytes"].is_number());
    assert!(json["memory"]["currentUsage"].is_string());
    assert!(json["inventory"]["totalItems"].is_number());
    assert!(json["health"]["status"].is_string());
    assert!(json["temporal"]["uptimeMs"].is_number());
    assert_eq!(json["temporal"]["trend"], "stable");
}

#[tokio::test(start_paused = true)]
async fn test_entry_snapshots() {
    setup();

    use memoflight::TaskStatus;

    let probe = Probe::new();
    let cache = MemoCache::new(CacheOptions::default(), probe.sized_fetcher(Duration::ZERO, 50));

    cache.get(&"a".to_string()).await.unwrap();
    cache.get(&"a".to_string()).await.unwrap();
    tokio::time::advance(Duration::from_millis(40)).await;

    let entries = cache.entries();
    assert_eq!(entries.len(), 1);

    let entry = &entries[0];
    assert_eq!(entry.status, TaskStatus::Active);
    assert_eq!(entry.uses, 2);
    assert_eq!(entry.bytes, 100);
    assert!(entry.age_ms >= 40);
    assert!(entry.score > 0.0);
    assert_eq!(entry.fingerprint.len(), 32);
}

#[tokio::test(start_paused = true)]
async fn test_memory_view_formats_sizes() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(CacheOptions::default(), probe.sized_fetcher(Duration::ZERO, 1024));

    cache.get(&"a".to_string()).await.unwrap();

    let stats = cache.statistics();
    assert_eq!(stats.memory.current_usage_bytes, 2048);
    assert_eq!(stats.memory.current_usage, "2.0 KB");
    assert_eq!(stats.memory.limit_bytes, 10 * 1024 * 1024);
    assert_eq!(stats.memory.limit, "10.0 MB");
    assert!(stats.memory.usage_percentage > 0.0);
}
