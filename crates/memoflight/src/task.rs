use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ExpirationStrategy;
use crate::error::CacheContents;
use crate::fingerprint::Fingerprint;
use crate::slot::Slot;

/// The derived status of a cache task.
///
/// Status is a pure function of the task's timestamps, its captured outcome
/// and the cache policies; it is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created but not yet admitted by the scheduler.
    Queued,
    /// Admitted; the fetch is in flight.
    Running,
    /// Resolved successfully and not expired.
    Active,
    /// The fetch failed; the error is captured on the task.
    Failed,
    /// Resolved but past its TTL or idle window.
    Expired,
}

/// A point-in-time view of one task, handed to the eviction score function.
#[derive(Debug, Clone, Copy)]
pub struct TaskMetrics {
    /// How often readers have accessed the task.
    pub uses: u64,
    /// The resident-byte estimate of the cached value.
    pub bytes: u64,
    /// Time since the task was created.
    pub age: Duration,
    /// Time since the task was last read.
    pub idle_for: Duration,
    /// The configured entry lifetime.
    pub ttl: Duration,
}

/// A user-supplied replacement for [`default_score`].
pub type ScoreFn = Arc<dyn Fn(&TaskMetrics) -> f64 + Send + Sync>;

/// The default eviction score; higher means more valuable.
///
/// Frequently used, compact, recently touched entries score highest:
/// `(uses * 1024) / bytes / time_score`, where `time_score` is the mean of
/// the entry's age and idle time relative to the TTL. A zero time score is
/// treated as 1 so brand-new entries are not infinitely valuable.
pub fn default_score(metrics: &TaskMetrics) -> f64 {
    let uses = metrics.uses as f64;
    let bytes = metrics.bytes.max(1) as f64;
    let ttl_ms = (metrics.ttl.as_millis() as f64).max(1.0);

    let age_ms = metrics.age.as_millis() as f64;
    let idle_ms = metrics.idle_for.as_millis() as f64;
    let mut time_score = ((age_ms + idle_ms) / 2.0) / ttl_ms;
    if time_score == 0.0 {
        time_score = 1.0;
    }

    uses * 1024.0 / bytes / time_score
}

/// One cache entry: the originating input, the completion slot shared with
/// all readers, and the bookkeeping the scheduler and sweeper work from.
///
/// A task is owned exclusively by the store under its fingerprint; readers
/// and the runner hold `Arc`s, so a task deleted mid-flight still completes
/// and its awaiting readers still observe the outcome.
pub(crate) struct Task<K, V> {
    input: K,
    fingerprint: Fingerprint,
    slot: Slot<V>,
    created_at: Instant,
    last_access: Mutex<Instant>,
    started_at: OnceLock<Instant>,
    bytes: AtomicU64,
    uses: AtomicU64,
}

impl<K, V> Task<K, V> {
    /// Creates a task waiting for scheduler admission.
    pub fn new(input: K, fingerprint: Fingerprint) -> Self {
        let now = Instant::now();
        Self {
            input,
            fingerprint,
            slot: Slot::new(),
            created_at: now,
            last_access: Mutex::new(now),
            started_at: OnceLock::new(),
            bytes: AtomicU64::new(0),
            uses: AtomicU64::new(0),
        }
    }

    /// Creates a task that is resolved from the start, as `set` produces.
    pub fn new_resolved(input: K, fingerprint: Fingerprint, value: Arc<V>, bytes: u64) -> Self {
        let task = Self::new(input, fingerprint);
        task.started_at.set(Instant::now()).ok();
        task.bytes.store(bytes, Ordering::Relaxed);
        task.slot.resolve(value);
        task
    }

    /// Creates a task that starts out running, for caller-supplied futures.
    pub fn new_running(input: K, fingerprint: Fingerprint) -> Self {
        let task = Self::new(input, fingerprint);
        task.started_at.set(Instant::now()).ok();
        task
    }

    pub fn input(&self) -> &K {
        &self.input
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn slot(&self) -> &Slot<V> {
        &self.slot
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_access(&self) -> Instant {
        *self.last_access.lock().unwrap()
    }

    pub fn uses(&self) -> u64 {
        self.uses.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn set_bytes(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::Relaxed);
    }

    /// Records the fetch start. Returns `false` if the task was already
    /// started, making a second `run` a no-op.
    pub fn mark_started(&self) -> bool {
        self.started_at.set(Instant::now()).is_ok()
    }

    /// Whether the entry is past its lifetime under the given strategy.
    pub fn is_expired(&self, strategy: ExpirationStrategy, ttl: Duration, now: Instant) -> bool {
        let Some(completed_at) = self.slot.completed_at() else {
            return false;
        };
        let reference = match strategy {
            ExpirationStrategy::Expire => completed_at,
            ExpirationStrategy::Idle => self.last_access(),
        };
        now.saturating_duration_since(reference) > ttl
    }

    pub fn status(&self, strategy: ExpirationStrategy, ttl: Duration, now: Instant) -> TaskStatus {
        match self.slot.peek() {
            None => {
                if self.started_at.get().is_some() {
                    TaskStatus::Running
                } else {
                    TaskStatus::Queued
                }
            }
            Some(Err(_)) => TaskStatus::Failed,
            Some(Ok(_)) => {
                if self.is_expired(strategy, ttl, now) {
                    TaskStatus::Expired
                } else {
                    TaskStatus::Active
                }
            }
        }
    }

    pub fn metrics(&self, ttl: Duration, now: Instant) -> TaskMetrics {
        TaskMetrics {
            uses: self.uses(),
            bytes: self.bytes(),
            age: now.saturating_duration_since(self.created_at),
            idle_for: now.saturating_duration_since(self.last_access()),
            ttl,
        }
    }

    /// The task's current eviction score.
    pub fn score(&self, score_fn: Option<&ScoreFn>, ttl: Duration, now: Instant) -> f64 {
        let metrics = self.metrics(ttl, now);
        match score_fn {
            Some(score_fn) => score_fn(&metrics),
            None => default_score(&metrics),
        }
    }
}

impl<K, V> Task<K, V>
where
    V: Clone,
{
    /// Awaits the task's outcome as a reader.
    ///
    /// Bumps the use counter and the last-access time up front, so idle
    /// expiration and scoring see the read even while the fetch is still in
    /// flight. With `use_clones`, successful values are handed out as fresh
    /// deep copies; errors pass through unchanged.
    pub async fn output(&self, use_clones: bool) -> CacheContents<Arc<V>> {
        self.uses.fetch_add(1, Ordering::Relaxed);
        *self.last_access.lock().unwrap() = Instant::now();

        let contents = self.slot.wait().await;
        match contents {
            Ok(value) if use_clones => Ok(Arc::new(V::clone(&value))),
            other => other,
        }
    }
}
