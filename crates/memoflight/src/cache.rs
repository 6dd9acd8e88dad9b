use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{CacheOptions, ErrorTaskPolicy};
use crate::error::{CacheContents, CacheError};
use crate::estimate::{estimate_bytes, EstimateBytes};
use crate::fetcher::Fetcher;
use crate::fingerprint::{fingerprint, Fingerprint, KeyTransform};
use crate::scheduler::Scheduler;
use crate::stats::{Inventory, Operations, ReadKind, Statistics, StatsState};
use crate::store::Store;
use crate::sweeper;
use crate::task::{ScoreFn, Task, TaskMetrics, TaskStatus};

/// Everything the facade, runners and the sweeper share.
pub(crate) struct Shared<K, V> {
    pub(crate) options: CacheOptions,
    pub(crate) key_transform: Option<KeyTransform<K>>,
    pub(crate) score_fn: Option<ScoreFn>,
    pub(crate) fetcher: Arc<dyn Fetcher<K, V>>,
    pub(crate) registry: Mutex<Registry<K, V>>,
    pub(crate) sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// The mutable cache state: store, scheduler bookkeeping and metrics.
///
/// All of it lives behind one mutex that is never held across an await, so
/// every suspension point observes a consistent cache.
pub(crate) struct Registry<K, V> {
    pub(crate) store: Store<K, V>,
    pub(crate) scheduler: Scheduler<K, V>,
    pub(crate) stats: StatsState,
}

impl<K, V> Registry<K, V> {
    /// Detaches a task that lost its place in the store.
    ///
    /// Accounts the released bytes and, if the task never started, drops it
    /// from the queue and rejects its slot so awaiting readers are not
    /// stranded. Started tasks keep running detached; their result is
    /// discarded at store lookup time.
    fn discard(&mut self, task: &Arc<Task<K, V>>) {
        let bytes = task.bytes();
        if bytes > 0 {
            self.stats.record_released_bytes(bytes);
        }

        if task.slot().is_completed() {
            return;
        }

        // Claiming the start edge under the registry lock means no runner
        // exists for this task and none will ever be spawned, so the
        // rejection is ours to deliver. A task that already started keeps
        // running detached and completes its own slot.
        if task.mark_started() {
            self.scheduler.forget(task);
            task.slot()
                .reject(CacheError::Fetch("evicted before the fetch started".into()));
        }
    }
}

/// A point-in-time diagnostic view of one cache entry.
///
/// Returned by [`MemoCache::entries`]; the score is computed with the same
/// function eviction uses, so the snapshot shows exactly what the next
/// memory pass would see.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySnapshot {
    pub fingerprint: String,
    pub status: TaskStatus,
    pub uses: u64,
    pub bytes: u64,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub score: f64,
}

/// The asynchronous memoization cache.
///
/// `MemoCache` memoizes the results of a fallible, latency-bearing fetch
/// function per input fingerprint. At most one fetch is in flight per
/// fingerprint; concurrent readers coalesce onto it and observe the same
/// outcome. Entries expire by TTL or idle time, the resident footprint is
/// capped, and a periodic sweeper evicts the lowest-scored entries once the
/// cap is exceeded.
///
/// The handle is cheap to clone; clones operate on the same cache.
///
/// ```
/// use memoflight::{CacheOptions, MemoCache};
///
/// # async fn example() -> memoflight::CacheContents<()> {
/// let cache = MemoCache::new(CacheOptions::default(), |name: String| async move {
///     Ok(format!("value for {name}"))
/// });
///
/// let value = cache.get(&"config".to_string()).await?;
/// assert_eq!(*value, "value for config");
/// # Ok(())
/// # }
/// ```
pub struct MemoCache<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for MemoCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> std::fmt::Debug for MemoCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.shared.registry.lock().unwrap();
        f.debug_struct("MemoCache")
            .field("options", &self.shared.options)
            .field("entries", &registry.store.len())
            .field("queued", &registry.scheduler.queued_len())
            .field("running", &registry.scheduler.running_len())
            .field("fetches", &registry.stats.fetches())
            .finish()
    }
}

/// Configures and builds a [`MemoCache`].
///
/// The plain-data options live in [`CacheOptions`]; the builder carries the
/// function-valued ones: a custom fingerprint transform and a custom
/// eviction score.
pub struct MemoCacheBuilder<K, V> {
    options: CacheOptions,
    key_transform: Option<KeyTransform<K>>,
    score_fn: Option<ScoreFn>,
    _output: std::marker::PhantomData<fn() -> V>,
}

impl<K, V> Default for MemoCacheBuilder<K, V> {
    fn default() -> Self {
        Self {
            options: CacheOptions::default(),
            key_transform: None,
            score_fn: None,
            _output: std::marker::PhantomData,
        }
    }
}

impl<K, V> MemoCacheBuilder<K, V>
where
    K: Serialize + Clone + Send + Sync + 'static,
    V: EstimateBytes + Clone + Send + Sync + 'static,
{
    pub fn options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the default fingerprint pipeline entirely.
    pub fn key_transform(
        mut self,
        transform: impl Fn(&K) -> CacheContents<String> + Send + Sync + 'static,
    ) -> Self {
        self.key_transform = Some(Arc::new(transform));
        self
    }

    /// Replaces the default eviction score.
    pub fn score_fn(mut self, score_fn: impl Fn(&TaskMetrics) -> f64 + Send + Sync + 'static) -> Self {
        self.score_fn = Some(Arc::new(score_fn));
        self
    }

    pub fn build(self, fetcher: impl Fetcher<K, V>) -> MemoCache<K, V> {
        MemoCache {
            shared: Arc::new(Shared {
                options: self.options,
                key_transform: self.key_transform,
                score_fn: self.score_fn,
                fetcher: Arc::new(fetcher),
                registry: Mutex::new(Registry {
                    store: Store::default(),
                    scheduler: Scheduler::default(),
                    stats: StatsState::new(Instant::now()),
                }),
                sweeper: Mutex::new(None),
            }),
        }
    }
}

impl<K, V> MemoCache<K, V>
where
    K: Serialize + Clone + Send + Sync + 'static,
    V: EstimateBytes + Clone + Send + Sync + 'static,
{
    pub fn builder() -> MemoCacheBuilder<K, V> {
        MemoCacheBuilder::default()
    }

    pub fn new(options: CacheOptions, fetcher: impl Fetcher<K, V>) -> Self {
        Self::builder().options(options).build(fetcher)
    }

    pub fn options(&self) -> &CacheOptions {
        &self.shared.options
    }

    /// Retrieves the value for `input`, fetching it if necessary.
    ///
    /// On a miss (no entry, or an expired or dropped-failure entry) a new
    /// task is installed and handed to the scheduler; the caller awaits its
    /// outcome. On a hit the caller awaits the existing task, which may
    /// still be in flight. Errors captured on the entry are returned with
    /// their original message.
    pub async fn get(&self, input: &K) -> CacheContents<Arc<V>> {
        self.get_inner(input, false).await
    }

    /// Like [`get`](Self::get), but evicts any existing entry first, always
    /// triggering a fresh fetch.
    pub async fn get_fresh(&self, input: &K) -> CacheContents<Arc<V>> {
        self.get_inner(input, true).await
    }

    async fn get_inner(&self, input: &K, force: bool) -> CacheContents<Arc<V>> {
        let started = Instant::now();
        let fingerprint = self.fingerprint(input)?;
        self.ensure_sweeper();

        let (task, kind) = self.lookup_or_install(input, &fingerprint, force);
        self.shared.consume();

        let result = task
            .output(self.shared.options.fetching_policy.use_clones)
            .await;

        let mut registry = self.shared.registry.lock().unwrap();
        registry
            .stats
            .record_response(kind, started.elapsed(), result.is_err());

        result
    }

    /// Looks the fingerprint up and returns a servable task, installing a
    /// fresh one when there is none.
    fn lookup_or_install(
        &self,
        input: &K,
        fingerprint: &Fingerprint,
        force: bool,
    ) -> (Arc<Task<K, V>>, ReadKind) {
        let now = Instant::now();
        let ttl = self.shared.options.cache_policy.ttl;
        let strategy = self.shared.options.cache_policy.expiration_strategy;
        let error_policy = self.shared.options.cache_policy.error_task_policy;

        let mut registry = self.shared.registry.lock().unwrap();

        if force {
            if let Some(prior) = registry.store.remove(fingerprint) {
                tracing::trace!(%fingerprint, "force-evicting entry");
                registry.discard(&prior);
            }
        }

        if let Some(task) = registry.store.get(fingerprint).cloned() {
            let servable = match task.status(strategy, ttl, now) {
                TaskStatus::Queued | TaskStatus::Running | TaskStatus::Active => true,
                TaskStatus::Failed => error_policy == ErrorTaskPolicy::Cache,
                TaskStatus::Expired => false,
            };
            if servable {
                registry.stats.record_hit();
                return (task, ReadKind::Cached);
            }
            tracing::trace!(%fingerprint, "replacing stale entry");
            registry.store.remove(fingerprint);
            registry.discard(&task);
        }

        registry.stats.record_miss();
        let task = Arc::new(Task::new(input.clone(), fingerprint.clone()));
        registry.store.insert_or_replace(Arc::clone(&task));
        registry.scheduler.enqueue(Arc::clone(&task));
        tracing::trace!(%fingerprint, "installed new task");

        (task, ReadKind::Fetched)
    }

    /// Installs a pre-resolved value, replacing any existing entry.
    pub fn set(&self, input: &K, value: V) -> CacheContents<()> {
        let fingerprint = self.fingerprint(input)?;
        self.ensure_sweeper();

        let bytes = estimate_bytes(&value);
        let task = Arc::new(Task::new_resolved(
            input.clone(),
            fingerprint.clone(),
            Arc::new(value),
            bytes,
        ));

        let mut registry = self.shared.registry.lock().unwrap();
        if let Some(prior) = registry.store.insert_or_replace(task) {
            registry.discard(&prior);
        }
        tracing::trace!(%fingerprint, bytes, "installed resolved entry");
        Ok(())
    }

    /// Installs an entry backed by a caller-supplied future.
    ///
    /// The task starts out running immediately, using `future` in place of
    /// the configured fetch function; the per-fetch timeout still applies.
    pub fn set_with<F>(&self, input: &K, future: F) -> CacheContents<()>
    where
        F: Future<Output = CacheContents<V>> + Send + 'static,
    {
        let fingerprint = self.fingerprint(input)?;
        self.ensure_sweeper();

        let task = Arc::new(Task::new_running(input.clone(), fingerprint.clone()));
        {
            let mut registry = self.shared.registry.lock().unwrap();
            if let Some(prior) = registry.store.insert_or_replace(Arc::clone(&task)) {
                registry.discard(&prior);
            }
            registry.scheduler.register_running(Arc::clone(&task));
        }
        tracing::trace!(%fingerprint, "installed entry with supplied future");

        self.shared.drive(task, future.boxed());
        Ok(())
    }

    /// Installs a queued entry that will be produced by the fetch function
    /// once the scheduler admits it, replacing any existing entry.
    pub fn prime(&self, input: &K) -> CacheContents<()> {
        let fingerprint = self.fingerprint(input)?;
        self.ensure_sweeper();

        let task = Arc::new(Task::new(input.clone(), fingerprint.clone()));
        {
            let mut registry = self.shared.registry.lock().unwrap();
            if let Some(prior) = registry.store.insert_or_replace(Arc::clone(&task)) {
                registry.discard(&prior);
            }
            registry.scheduler.enqueue(task);
        }
        tracing::trace!(%fingerprint, "primed entry");

        self.shared.consume();
        Ok(())
    }

    /// Whether the store holds an entry for `input`, in any status.
    pub fn has(&self, input: &K) -> CacheContents<bool> {
        let fingerprint = self.fingerprint(input)?;
        let registry = self.shared.registry.lock().unwrap();
        Ok(registry.store.contains(&fingerprint))
    }

    /// Removes the entry for `input`, accounting its bytes as released.
    ///
    /// Returns whether an entry was removed; deleting a missing entry is a
    /// no-op.
    pub fn delete(&self, input: &K) -> CacheContents<bool> {
        let fingerprint = self.fingerprint(input)?;
        let removed = {
            let mut registry = self.shared.registry.lock().unwrap();
            match registry.store.remove(&fingerprint) {
                Some(task) => {
                    tracing::trace!(%fingerprint, "deleted entry");
                    registry.discard(&task);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.shared.consume();
        }
        Ok(removed)
    }

    /// Removes all entries, resets the metrics and uptime, and stops the
    /// sweeper. The next operation re-arms it.
    pub fn clear(&self) {
        if let Some(handle) = self.shared.sweeper.lock().unwrap().take() {
            handle.abort();
        }

        let mut registry = self.shared.registry.lock().unwrap();
        let tasks: Vec<_> = registry.store.iter().cloned().collect();
        registry.store.clear();
        registry.scheduler.clear();
        for task in &tasks {
            registry.discard(task);
        }
        registry.stats.reset(Instant::now());
        tracing::debug!(dropped = tasks.len(), "cache cleared");
    }

    /// A snapshot of the inputs across current tasks.
    pub fn keys(&self) -> Vec<K> {
        let registry = self.shared.registry.lock().unwrap();
        registry.store.iter().map(|task| task.input().clone()).collect()
    }

    /// A diagnostic snapshot of every entry: status, usage, bytes and the
    /// score the next eviction pass would use.
    pub fn entries(&self) -> Vec<EntrySnapshot> {
        let now = Instant::now();
        let ttl = self.shared.options.cache_policy.ttl;
        let strategy = self.shared.options.cache_policy.expiration_strategy;
        let score_fn = self.shared.score_fn.as_ref();

        let registry = self.shared.registry.lock().unwrap();
        registry
            .store
            .iter()
            .map(|task| {
                let metrics = task.metrics(ttl, now);
                EntrySnapshot {
                    fingerprint: task.fingerprint().to_string(),
                    status: task.status(strategy, ttl, now),
                    uses: metrics.uses,
                    bytes: metrics.bytes,
                    age_ms: metrics.age.as_millis() as u64,
                    idle_ms: metrics.idle_for.as_millis() as u64,
                    score: task.score(score_fn, ttl, now),
                }
            })
            .collect()
    }

    /// The number of entries currently in the store, in any status.
    pub fn len(&self) -> usize {
        self.shared.registry.lock().unwrap().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.registry.lock().unwrap().store.is_empty()
    }

    /// The aggregated statistics view.
    pub fn statistics(&self) -> Statistics {
        let now = Instant::now();
        let options = &self.shared.options;
        let ttl = options.cache_policy.ttl;
        let strategy = options.cache_policy.expiration_strategy;

        let registry = self.shared.registry.lock().unwrap();

        let usage = registry.store.usage_bytes(strategy, ttl, now);
        let memory = registry
            .stats
            .memory(usage, options.memory_policy.max_bytes);

        let uses: Vec<u64> = registry.store.iter().map(|task| task.uses()).collect();

        Statistics {
            efficiency: registry.stats.efficiency(),
            performance: registry.stats.performance(),
            operations: Operations {
                active_requests: registry.scheduler.running_len(),
                queued_requests: registry.scheduler.queued_len(),
                concurrency_limit: options.effective_concurrency(),
                rejected_requests: registry.stats.rejected(),
                peak_concurrency: registry.scheduler.peak_concurrency(),
            },
            inventory: Inventory::from_uses(&uses),
            health: registry.stats.health(memory.usage_percentage),
            temporal: registry.stats.temporal(now),
            memory,
        }
    }

    fn fingerprint(&self, input: &K) -> CacheContents<Fingerprint> {
        fingerprint(input, self.shared.key_transform.as_ref())
    }

    /// Arms the periodic sweeper if it is not running.
    fn ensure_sweeper(&self) {
        let mut sweeper = self.shared.sweeper.lock().unwrap();
        if sweeper.is_none() {
            *sweeper = Some(sweeper::spawn(&self.shared));
        }
    }
}

impl<K, V> Shared<K, V>
where
    K: Serialize + Clone + Send + Sync + 'static,
    V: EstimateBytes + Clone + Send + Sync + 'static,
{
    /// Admits whatever the concurrency cap allows and starts the admitted
    /// fetches.
    ///
    /// Invoked from every point where task status may have changed. Safe to
    /// call re-entrantly: admission moves tasks out of the queued set under
    /// the registry lock, so a nested call simply finds nothing left to do.
    pub(crate) fn consume(self: &Arc<Self>) {
        let cap = self.options.effective_concurrency();
        let admitted = {
            let mut registry = self.registry.lock().unwrap();
            let admitted = registry.scheduler.admit(cap);
            for task in &admitted {
                // A task is started exactly once; admission owns that edge.
                task.mark_started();
            }
            admitted
        };

        for task in admitted {
            let fetch = self.fetcher.fetch(task.input().clone());
            {
                let mut registry = self.registry.lock().unwrap();
                registry.stats.record_fetch_started();
            }
            self.drive(task, fetch);
        }
    }

    /// Spawns the runner that drives a fetch to completion, applying the
    /// per-fetch timeout.
    pub(crate) fn drive(self: &Arc<Self>, task: Arc<Task<K, V>>, fetch: BoxFuture<'static, CacheContents<V>>) {
        let shared = Arc::clone(self);
        let timeout = self.options.effective_timeout();

        tokio::spawn(async move {
            let outcome = match timeout {
                Some(limit) => {
                    // The fetch runs as its own task so a fired timer leaves
                    // it running detached; its eventual result is discarded.
                    let fetch = tokio::spawn(fetch);
                    match tokio::time::timeout(limit, fetch).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(join_error)) => {
                            tracing::error!(error = %join_error, "fetch task died");
                            Err(CacheError::InternalError)
                        }
                        Err(_elapsed) => Err(CacheError::Timeout(limit)),
                    }
                }
                None => fetch.await,
            };

            shared.complete(&task, outcome);
        });
    }

    /// Records a fetch outcome on its task and updates the bookkeeping.
    fn complete(self: &Arc<Self>, task: &Arc<Task<K, V>>, outcome: CacheContents<V>) {
        let failed = outcome.is_err();

        match outcome {
            Ok(value) => {
                let bytes = estimate_bytes(&value);
                task.set_bytes(bytes);
                task.slot().resolve(Arc::new(value));
                tracing::trace!(fingerprint = %task.fingerprint(), bytes, "fetch resolved");
            }
            Err(error) => {
                tracing::debug!(
                    fingerprint = %task.fingerprint(),
                    error = %error,
                    "fetch failed"
                );
                let mut registry = self.registry.lock().unwrap();
                registry.stats.record_error(error.is_timeout());
                drop(registry);
                task.slot().reject(error);
            }
        }

        {
            let mut registry = self.registry.lock().unwrap();
            registry.scheduler.finish(task);
            if failed
                && self.options.cache_policy.error_task_policy == ErrorTaskPolicy::Ignore
            {
                // Failures are transient under this policy: readers already
                // awaiting the slot get the error, the next read refetches.
                registry.store.remove_exact(task);
            }
        }

        self.consume();
    }
}
