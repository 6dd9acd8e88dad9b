use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The smallest sweeper period that can be configured.
///
/// Shorter intervals are clamped to this floor so a misconfigured cache does
/// not spend its time sweeping.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Governs when a resolved entry counts as expired.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpirationStrategy {
    /// The entry expires a fixed time after it was resolved.
    #[default]
    Expire,
    /// The entry expires once it has not been read for the configured time.
    /// Every read pushes the deadline out again.
    Idle,
}

/// Governs what happens to a task whose fetch failed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorTaskPolicy {
    /// Keep the failed task around; all subsequent readers receive the same
    /// error without re-running the fetch, until the entry expires or is
    /// deleted.
    Cache,
    /// Surface the error to current readers and drop the task right after,
    /// so the next read triggers a fresh fetch.
    #[default]
    Ignore,
}

/// Entry lifetime configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Entry lifetime. See [`ExpirationStrategy`] for how it is measured.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Whether `ttl` counts from resolution or from the last read.
    pub expiration_strategy: ExpirationStrategy,

    /// Whether failed fetches are cached or dropped after surfacing.
    pub error_task_policy: ErrorTaskPolicy,

    /// Sweeper period. Clamped to [`MIN_FLUSH_INTERVAL`].
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            expiration_strategy: ExpirationStrategy::default(),
            error_task_policy: ErrorTaskPolicy::default(),
            flush_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration for how fetches are admitted and their outputs handed out.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchingPolicy {
    /// Per-fetch wall-clock limit. When set, it is clamped to at most the
    /// configured `ttl`. Unset means fetches may take arbitrarily long.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Maximum number of concurrently running fetches. `0` (and any negative
    /// value) means unlimited.
    pub concurrency: i64,

    /// If true, readers receive a deep copy of the cached value instead of a
    /// shared reference.
    pub use_clones: bool,
}

impl Default for FetchingPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            concurrency: 0,
            use_clones: false,
        }
    }
}

/// Memory accounting and eviction configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryPolicy {
    /// Eviction high-water mark in bytes. `0` means "evict whenever any
    /// bytes are resident".
    pub max_bytes: u64,

    /// Eviction low-water mark in bytes. Must satisfy `0 < min < max`;
    /// anything else falls back to `max_bytes / 2`.
    pub min_bytes: Option<u64>,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            min_bytes: None,
        }
    }
}

impl MemoryPolicy {
    /// The low-water mark eviction drives usage below.
    ///
    /// Falls back to half the high-water mark when unset or out of range.
    pub fn effective_min_bytes(&self) -> u64 {
        match self.min_bytes {
            Some(min) if min > 0 && min < self.max_bytes => min,
            _ => self.max_bytes / 2,
        }
    }

    /// Whether `usage` is over the high-water mark and eviction should run.
    pub fn is_over_limit(&self, usage: u64) -> bool {
        if self.max_bytes == 0 {
            usage > 0
        } else {
            usage > self.max_bytes
        }
    }
}

/// All user-configurable cache options.
///
/// Every field has a sensible default, so `CacheOptions::default()` yields a
/// working configuration. The function-valued options (a custom fingerprint
/// transform and a custom eviction score) are not plain data and live on the
/// [`builder`](crate::MemoCache::builder) instead.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheOptions {
    pub cache_policy: CachePolicy,
    pub fetching_policy: FetchingPolicy,
    pub memory_policy: MemoryPolicy,
}

impl CacheOptions {
    /// Reads options from a JSON document.
    ///
    /// Durations accept humantime strings such as `"5m"` or `"1500ms"`;
    /// missing fields keep their defaults.
    pub fn from_reader(reader: impl io::Read) -> io::Result<Self> {
        serde_json::from_reader(io::BufReader::new(reader))
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Reads options from a JSON file on disk.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::from_reader(fs::File::open(path)?)
    }

    /// The sweeper period with the minimum enforced.
    pub fn effective_flush_interval(&self) -> Duration {
        self.cache_policy.flush_interval.max(MIN_FLUSH_INTERVAL)
    }

    /// The per-fetch deadline, clamped to the entry lifetime.
    ///
    /// A zero timeout counts as unset.
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.fetching_policy
            .timeout
            .filter(|timeout| !timeout.is_zero())
            .map(|timeout| timeout.min(self.cache_policy.ttl))
    }

    /// The concurrency cap, with non-positive values normalized to
    /// "unlimited".
    pub fn effective_concurrency(&self) -> usize {
        self.fetching_policy.concurrency.max(0) as usize
    }
}
