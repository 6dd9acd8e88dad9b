//! # Memoflight
//!
//! Memoflight is an in-process asynchronous memoization cache. It memoizes
//! key→value computations whose values come from a user-supplied, fallible,
//! latency-bearing fetch function, and it guarantees that for any request
//! fingerprint at most one computation is in flight: concurrent requesters
//! for the same fingerprint coalesce onto one fetch and observe the same
//! result.
//!
//! ## How a read works
//!
//! A [`get`](MemoCache::get) fingerprints the input and looks it up in the
//! store. On a miss (or on an expired or dropped-failure entry) a fresh task
//! is installed and handed to the scheduler, which admits queued tasks in
//! FIFO creation order up to the configured concurrency cap. The caller then
//! awaits the task's completion slot, together with every other reader of
//! the same fingerprint. Once the fetch finishes — or its deadline fires —
//! the outcome is recorded on the task and fanned out to all awaiters.
//!
//! ## Lifetimes and memory
//!
//! Entries live for a configured TTL, measured either from resolution
//! ([`ExpirationStrategy::Expire`]) or from the last read
//! ([`ExpirationStrategy::Idle`]). A periodic sweeper removes entries past
//! their lifetime, and when the resident-byte estimate exceeds the
//! configured high-water mark it evicts the lowest-scored entries until
//! usage falls below the low-water mark. The default score prefers
//! frequently-used, compact, recently-touched entries and can be replaced
//! wholesale via [`MemoCacheBuilder::score_fn`].
//!
//! In-flight computations are never preempted: the sweeper only touches
//! resolved entries, and deleting a fingerprint mid-fetch lets the fetch
//! finish detached while readers that already hold the slot still observe
//! its outcome. There is deliberately no cancellation surface.
//!
//! ## Errors
//!
//! All failure modes converge on [`CacheError`], and
//! [`CacheContents<T>`](CacheContents) is the `Result` alias used
//! throughout. Fetch failures are captured on the entry: depending on
//! [`ErrorTaskPolicy`] they are either cached and replayed to subsequent
//! readers, or surfaced once and dropped so the next read refetches.
//! Fingerprint problems surface synchronously and never mutate cache state.
//!
//! ## Observability
//!
//! The cache keeps aggregated counters and bounded latency windows, exposed
//! as a serializable [`Statistics`] view: hit rates, response-time
//! aggregates, scheduler occupancy, byte accounting, a per-entry usage
//! inventory, a coarse health judgement and a latency trend. Mutation paths
//! emit `tracing` events; the crate never installs a subscriber.
//!
//! ## Example
//!
//! ```
//! use memoflight::{CacheContents, CacheOptions, MemoCache};
//!
//! # async fn example() -> CacheContents<()> {
//! let cache = MemoCache::new(CacheOptions::default(), |user_id: u64| async move {
//!     // Stand-in for a slow lookup.
//!     Ok(format!("profile-{user_id}"))
//! });
//!
//! // One fetch, any number of concurrent readers.
//! let (a, b) = futures::join!(cache.get(&42), cache.get(&42));
//! assert_eq!(a?, b?);
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod error;
mod estimate;
mod fetcher;
mod fingerprint;
mod fmt;
mod scheduler;
mod slot;
mod stats;
mod store;
mod sweeper;
mod task;

pub use cache::{EntrySnapshot, MemoCache, MemoCacheBuilder};
pub use config::{
    CacheOptions, CachePolicy, ErrorTaskPolicy, ExpirationStrategy, FetchingPolicy, MemoryPolicy,
    MIN_FLUSH_INTERVAL,
};
pub use error::{CacheContents, CacheError};
pub use estimate::{estimate_bytes, EstimateBytes, Estimator};
pub use fetcher::Fetcher;
pub use fingerprint::{canonicalize, fingerprint, Fingerprint, FingerprintBuilder, KeyTransform};
pub use fmt::{format_bytes, format_uptime};
pub use stats::{
    Efficiency, Health, HealthStatus, Inventory, MemoryStats, Operations, Performance, Statistics,
    Temporal, Trend,
};
pub use task::{default_score, ScoreFn, TaskMetrics, TaskStatus};
