use std::sync::Arc;
use std::time::Duration;

use memoflight::{CacheOptions, Fetcher, MemoCache};

use crate::utils::{setup, Probe};

#[tokio::test(start_paused = true)]
async fn test_deduplication_under_burst() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(
        CacheOptions::default(),
        probe.fetcher(Duration::from_millis(10)),
    );

    let reads = (0..100).map(|_| {
        let cache = cache.clone();
        async move { cache.get(&"hot".to_string()).await }
    });
    let results = futures::future::join_all(reads).await;

    assert_eq!(results.len(), 100);
    for result in &results {
        assert_eq!(**result.as_ref().unwrap(), "result-hot");
    }

    // Exactly one fetch ran for the whole burst.
    assert_eq!(probe.calls(), 1);

    let stats = cache.statistics();
    assert_eq!(stats.efficiency.hits, 99);
    assert_eq!(stats.efficiency.misses, 1);
    assert_eq!(stats.efficiency.total_requests, 100);
}

#[tokio::test(start_paused = true)]
async fn test_readers_share_the_same_value() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(
        CacheOptions::default(),
        probe.fetcher(Duration::from_millis(5)),
    );

    let key = "shared".to_string();
    let (a, b) = futures::join!(cache.get(&key), cache.get(&key));
    let (a, b) = (a.unwrap(), b.unwrap());

    // Not just equal values: the very same allocation.
    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test(start_paused = true)]
async fn test_equal_canonical_inputs_share_one_task() {
    setup();

    let probe = Probe::new();
    let cache: MemoCache<serde_json::Value, String> = MemoCache::new(CacheOptions::default(), {
        let fetcher = probe.fetcher(Duration::from_millis(5));
        move |value: serde_json::Value| fetcher.fetch(value.to_string())
    });

    let a = serde_json::json!({ "user": 1, "region": "eu" });
    let b = serde_json::json!({ "region": "eu", "user": 1 });

    let (ra, rb) = futures::join!(cache.get(&a), cache.get(&b));
    assert_eq!(ra.unwrap(), rb.unwrap());
    assert_eq!(probe.calls(), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_clones_when_configured() {
    setup();

    let mut options = CacheOptions::default();
    options.fetching_policy.use_clones = true;

    let probe = Probe::new();
    let cache = MemoCache::new(options, probe.fetcher(Duration::from_millis(1)));

    let key = "cloned".to_string();
    let a = cache.get(&key).await.unwrap();
    let b = cache.get(&key).await.unwrap();

    assert_eq!(a, b);
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(probe.calls(), 1);
}
