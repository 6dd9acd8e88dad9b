use std::time::Duration;

use memoflight::{CacheError, CacheOptions, CachePolicy, ErrorTaskPolicy, MemoCache};

use crate::utils::{setup, Probe};

fn options_with_error_policy(error_task_policy: ErrorTaskPolicy) -> CacheOptions {
    CacheOptions {
        cache_policy: CachePolicy {
            error_task_policy,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_cached_errors_are_replayed() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(
        options_with_error_policy(ErrorTaskPolicy::Cache),
        probe.failing_fetcher(Duration::from_millis(5), "boom"),
    );

    let key = "x".to_string();
    let first = cache.get(&key).await.unwrap_err();
    let second = cache.get(&key).await.unwrap_err();
    let third = cache.get(&key).await.unwrap_err();

    assert_eq!(first, CacheError::Fetch("boom".into()));
    assert_eq!(first, second);
    assert_eq!(first, third);

    // The failure was fetched once and replayed from the entry after that.
    assert_eq!(probe.calls(), 1);
    assert!(cache.has(&key).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_ignored_errors_trigger_refetch() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(
        options_with_error_policy(ErrorTaskPolicy::Ignore),
        probe.failing_fetcher(Duration::from_millis(5), "boom"),
    );

    let key = "x".to_string();
    let first = cache.get(&key).await.unwrap_err();
    assert_eq!(first.to_string(), "fetch failed: boom");

    // The failed task is dropped right after surfacing.
    assert!(!cache.has(&key).unwrap());

    let second = cache.get(&key).await.unwrap_err();
    assert_eq!(second, first);
    assert_eq!(probe.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_readers_observe_the_same_error() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(
        options_with_error_policy(ErrorTaskPolicy::Ignore),
        probe.failing_fetcher(Duration::from_millis(10), "boom"),
    );

    let key = "y".to_string();
    let (a, b, c) = futures::join!(cache.get(&key), cache.get(&key), cache.get(&key));

    let a = a.unwrap_err();
    assert_eq!(a, b.unwrap_err());
    assert_eq!(a, c.unwrap_err());
    assert_eq!(probe.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_error_counters() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(
        options_with_error_policy(ErrorTaskPolicy::Ignore),
        probe.failing_fetcher(Duration::from_millis(1), "boom"),
    );

    for _ in 0..3 {
        let _ = cache.get(&"z".to_string()).await;
    }

    let stats = cache.statistics();
    assert_eq!(stats.health.recent_errors, 3);
    assert!(stats.health.error_rate > 0.0);
    assert_eq!(stats.health.timeouts, 0);
}
