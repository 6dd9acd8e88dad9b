use std::time::Duration;

use memoflight::{CacheOptions, CachePolicy, ExpirationStrategy, MemoCache};

use crate::utils::{setup, Probe};

fn options(ttl: Duration, expiration_strategy: ExpirationStrategy) -> CacheOptions {
    CacheOptions {
        cache_policy: CachePolicy {
            ttl,
            expiration_strategy,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_ttl_expiration_forces_refetch() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(
        options(Duration::from_millis(1), ExpirationStrategy::Expire),
        probe.fetcher(Duration::ZERO),
    );

    let key = "k".to_string();
    cache.get(&key).await.unwrap();
    assert_eq!(probe.calls(), 1);

    tokio::time::sleep(Duration::from_millis(5)).await;

    cache.get(&key).await.unwrap();
    assert_eq!(probe.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_idle_window_is_pushed_out_by_reads() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(
        options(Duration::from_millis(100), ExpirationStrategy::Idle),
        probe.fetcher(Duration::ZERO),
    );

    let key = "y".to_string();
    // Read every 50ms; the idle window never elapses.
    for _ in 0..5 {
        cache.get(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(probe.calls(), 1);

    // Left untouched past the window, the next read refetches.
    tokio::time::sleep(Duration::from_millis(150)).await;
    cache.get(&key).await.unwrap();
    assert_eq!(probe.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_expiration_ignores_reads() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(
        options(Duration::from_millis(100), ExpirationStrategy::Expire),
        probe.fetcher(Duration::ZERO),
    );

    let key = "z".to_string();
    for _ in 0..3 {
        cache.get(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    // The read at 120ms found the entry past its lifetime even though it
    // had been read 60ms earlier: reads do not extend it.
    assert_eq!(probe.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_removes_expired_entries() {
    setup();

    let probe = Probe::new();
    let options = CacheOptions {
        cache_policy: CachePolicy {
            ttl: Duration::from_millis(200),
            flush_interval: Duration::from_secs(1),
            ..Default::default()
        },
        ..Default::default()
    };
    let cache = MemoCache::new(options, probe.fetcher(Duration::ZERO));

    cache.get(&"gone".to_string()).await.unwrap();
    assert_eq!(cache.len(), 1);

    // Expired entries linger until the sweeper fires, then disappear
    // without a read touching them.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(cache.len(), 0);
    assert!(!cache.has(&"gone".to_string()).unwrap());
}
