//! The periodic cleanup task.
//!
//! Each firing makes two passes over the store: the expiration pass removes
//! entries past their lifetime (and dropped failures), the memory pass
//! evicts the lowest-scored entries once usage exceeds the high-water mark.
//! In-flight computations are never preempted; queued and running tasks are
//! left alone.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cache::Shared;
use crate::config::ErrorTaskPolicy;
use crate::estimate::EstimateBytes;
use crate::task::TaskStatus;

/// Spawns the sweeper loop for a cache.
///
/// The task holds only a weak handle, so it winds down on its own once the
/// cache is gone; `clear` aborts it explicitly.
pub(crate) fn spawn<K, V>(shared: &Arc<Shared<K, V>>) -> JoinHandle<()>
where
    K: Serialize + Clone + Send + Sync + 'static,
    V: EstimateBytes + Clone + Send + Sync + 'static,
{
    let period = shared.options.effective_flush_interval();
    let weak = Arc::downgrade(shared);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the sweeper only ever runs
        // a full period after being armed.
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(shared) = weak.upgrade() else {
                break;
            };
            sweep(&shared);
        }
    })
}

/// One sweeper firing: the expiration pass followed by the memory pass.
pub(crate) fn sweep<K, V>(shared: &Shared<K, V>)
where
    K: Serialize + Clone + Send + Sync + 'static,
    V: EstimateBytes + Clone + Send + Sync + 'static,
{
    let now = Instant::now();
    let ttl = shared.options.cache_policy.ttl;
    let strategy = shared.options.cache_policy.expiration_strategy;
    let error_policy = shared.options.cache_policy.error_task_policy;

    let mut registry = shared.registry.lock().unwrap();

    // Expiration pass.
    let stale: Vec<_> = registry
        .store
        .iter()
        .filter(|task| match task.status(strategy, ttl, now) {
            TaskStatus::Expired => true,
            TaskStatus::Failed => {
                error_policy == ErrorTaskPolicy::Ignore || task.is_expired(strategy, ttl, now)
            }
            TaskStatus::Queued | TaskStatus::Running | TaskStatus::Active => false,
        })
        .cloned()
        .collect();

    for task in &stale {
        registry.store.remove_exact(task);
        let bytes = task.bytes();
        if bytes > 0 {
            registry.stats.record_released_bytes(bytes);
        }
        tracing::trace!(fingerprint = %task.fingerprint(), "removed stale entry");
    }

    // Memory pass.
    let mut usage = registry
        .store
        .usage_bytes(strategy, ttl, now);
    if !shared.options.memory_policy.is_over_limit(usage) {
        return;
    }

    registry.stats.record_cleanup();
    let low_water = shared.options.memory_policy.effective_min_bytes();

    let mut victims: Vec<_> = registry
        .store
        .iter()
        .filter(|task| {
            matches!(
                task.status(strategy, ttl, now),
                TaskStatus::Active | TaskStatus::Failed
            )
        })
        .map(|task| {
            let score = task.score(shared.score_fn.as_ref(), ttl, now);
            (score, Arc::clone(task))
        })
        .collect();
    victims.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut evicted = 0_usize;
    for (score, task) in victims {
        if usage < low_water {
            break;
        }
        registry.store.remove_exact(&task);
        let bytes = task.bytes();
        usage = usage.saturating_sub(bytes);
        if bytes > 0 {
            registry.stats.record_released_bytes(bytes);
        }
        evicted += 1;
        tracing::debug!(
            fingerprint = %task.fingerprint(),
            score,
            bytes,
            "evicted low-scored entry"
        );
    }

    tracing::debug!(evicted, usage, "memory pass finished");
}
