use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use memoflight::{CacheError, CacheOptions, FetchingPolicy, MemoCache};

use crate::utils::{setup, Probe};

fn options_with_timeout(timeout: Duration) -> CacheOptions {
    CacheOptions {
        fetching_policy: FetchingPolicy {
            timeout: Some(timeout),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_fetch_times_out() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(
        options_with_timeout(Duration::from_millis(100)),
        probe.fetcher(Duration::from_millis(200)),
    );

    let err = cache.get(&"late".to_string()).await.unwrap_err();
    assert_eq!(err, CacheError::Timeout(Duration::from_millis(100)));

    let stats = cache.statistics();
    assert_eq!(stats.health.timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_fetch_does_not_populate_the_cache() {
    setup();

    let completed = Arc::new(AtomicBool::new(false));
    let fetcher = {
        let completed = Arc::clone(&completed);
        move |_key: String| {
            let completed = Arc::clone(&completed);
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                completed.store(true, Ordering::SeqCst);
                Ok("too late".to_string())
            }
        }
    };
    let cache = MemoCache::new(options_with_timeout(Duration::from_millis(100)), fetcher);

    let key = "late".to_string();
    cache.get(&key).await.unwrap_err();

    // Let the detached fetch run to completion in the background.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(completed.load(Ordering::SeqCst));

    // Its result was discarded; the entry is gone.
    assert!(!cache.has(&key).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_fast_fetch_beats_the_timer() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(
        options_with_timeout(Duration::from_millis(100)),
        probe.fetcher(Duration::from_millis(10)),
    );

    let value = cache.get(&"fast".to_string()).await.unwrap();
    assert_eq!(*value, "result-fast");
    assert_eq!(cache.statistics().health.timeouts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fans_out_to_all_readers() {
    setup();

    let probe = Probe::new();
    let cache = MemoCache::new(
        options_with_timeout(Duration::from_millis(50)),
        probe.fetcher(Duration::from_millis(200)),
    );

    let key = "late".to_string();
    let (a, b) = futures::join!(cache.get(&key), cache.get(&key));

    let a = a.unwrap_err();
    assert_eq!(a, b.unwrap_err());
    assert!(a.is_timeout());
    assert_eq!(probe.calls(), 1);
    assert_eq!(cache.statistics().health.timeouts, 1);
}
