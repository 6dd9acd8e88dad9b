use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::fmt::{format_bytes, format_uptime};

/// Capacity of the cached/fetch latency windows.
const WINDOW_LEN: usize = 1000;

/// Capacity of the recent overall window used for trend analysis.
const RECENT_LEN: usize = 100;

/// Use count from which an entry counts as high-value in the inventory view.
const HIGH_VALUE_USES: u64 = 10;

/// Which path served a read, for latency accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadKind {
    /// Served from an existing task (even one still in flight).
    Cached,
    /// Triggered a fresh fetch.
    Fetched,
}

/// Aggregated counters and latency windows.
///
/// All counters are monotone; only [`reset`](StatsState::reset) (driven by
/// `clear`) sets them back to zero along with the uptime epoch.
pub(crate) struct StatsState {
    created_at: Instant,
    hits: u64,
    misses: u64,
    fetches: u64,
    rejected: u64,
    cleanup_count: u64,
    released_bytes: u64,
    errors: u64,
    timeouts: u64,
    cached_window: VecDeque<f64>,
    fetch_window: VecDeque<f64>,
    recent: VecDeque<f64>,
    recent_errors: VecDeque<bool>,
}

impl StatsState {
    pub fn new(now: Instant) -> Self {
        Self {
            created_at: now,
            hits: 0,
            misses: 0,
            fetches: 0,
            rejected: 0,
            cleanup_count: 0,
            released_bytes: 0,
            errors: 0,
            timeouts: 0,
            cached_window: VecDeque::with_capacity(WINDOW_LEN),
            fetch_window: VecDeque::with_capacity(WINDOW_LEN),
            recent: VecDeque::with_capacity(RECENT_LEN),
            recent_errors: VecDeque::with_capacity(RECENT_LEN),
        }
    }

    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_fetch_started(&mut self) {
        self.fetches += 1;
    }

    /// How many fresh fetches the cache has started.
    pub fn fetches(&self) -> u64 {
        self.fetches
    }

    pub fn record_cleanup(&mut self) {
        self.cleanup_count += 1;
    }

    pub fn record_released_bytes(&mut self, bytes: u64) {
        self.released_bytes += bytes;
    }

    pub fn record_error(&mut self, timeout: bool) {
        self.errors += 1;
        if timeout {
            self.timeouts += 1;
        }
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    /// Records a completed read with its end-to-end latency.
    pub fn record_response(&mut self, kind: ReadKind, elapsed: Duration, failed: bool) {
        let ms = elapsed.as_secs_f64() * 1000.0;

        let window = match kind {
            ReadKind::Cached => &mut self.cached_window,
            ReadKind::Fetched => &mut self.fetch_window,
        };
        push_bounded(window, ms, WINDOW_LEN);
        push_bounded(&mut self.recent, ms, RECENT_LEN);
        push_bounded(&mut self.recent_errors, failed, RECENT_LEN);
    }

    pub fn efficiency(&self) -> Efficiency {
        let total_requests = self.hits + self.misses;
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / total_requests as f64
        };

        let avg_cached = average(&self.cached_window);
        let avg_fetch = average(&self.fetch_window);
        let time_saved_ms = (self.hits as f64 * (avg_fetch - avg_cached)).max(0.0);

        Efficiency {
            hit_rate,
            hits: self.hits,
            misses: self.misses,
            total_requests,
            time_saved_ms,
        }
    }

    pub fn performance(&self) -> Performance {
        let avg_cached = average(&self.cached_window);
        let avg_fetch = average(&self.fetch_window);

        let mut all: Vec<f64> = self
            .cached_window
            .iter()
            .chain(self.fetch_window.iter())
            .copied()
            .collect();
        all.sort_by(|a, b| a.total_cmp(b));

        let p95 = percentile(&all, 0.95);
        let fastest = all.first().copied().unwrap_or(0.0);
        let slowest = all.last().copied().unwrap_or(0.0);

        let performance_gain = if avg_cached > 0.0 && avg_fetch > 0.0 {
            avg_fetch / avg_cached
        } else {
            0.0
        };

        Performance {
            avg_cached_response_time: avg_cached,
            avg_fetch_response_time: avg_fetch,
            performance_gain,
            p95_response_time: p95,
            fastest_response: fastest,
            slowest_response: slowest,
        }
    }

    pub fn memory(
        &self,
        current_usage_bytes: u64,
        limit_bytes: u64,
    ) -> MemoryStats {
        let usage_percentage = if limit_bytes == 0 {
            if current_usage_bytes > 0 {
                100.0
            } else {
                0.0
            }
        } else {
            current_usage_bytes as f64 / limit_bytes as f64 * 100.0
        };

        MemoryStats {
            current_usage: format_bytes(current_usage_bytes),
            current_usage_bytes,
            usage_percentage,
            limit: format_bytes(limit_bytes),
            limit_bytes,
            cleanup_count: self.cleanup_count,
            memory_reclaimed: format_bytes(self.released_bytes),
            memory_reclaimed_bytes: self.released_bytes,
        }
    }

    pub fn health(&self, usage_percentage: f64) -> Health {
        let total_requests = self.hits + self.misses;
        let error_rate = if total_requests == 0 {
            0.0
        } else {
            self.errors as f64 / total_requests as f64
        };
        let recent_errors = self.recent_errors.iter().filter(|failed| **failed).count();

        let mut score: i64 = 100;
        let mut issues = Vec::new();

        if error_rate > 0.05 {
            score -= 30;
            issues.push(format!("high error rate: {:.1}%", error_rate * 100.0));
        } else if error_rate > 0.01 {
            score -= 10;
            issues.push(format!("elevated error rate: {:.1}%", error_rate * 100.0));
        }

        if usage_percentage > 90.0 {
            score -= 20;
            issues.push(format!("memory usage at {usage_percentage:.0}% of limit"));
        } else if usage_percentage > 75.0 {
            score -= 10;
            issues.push(format!("memory usage at {usage_percentage:.0}% of limit"));
        }

        let hit_rate = if total_requests == 0 {
            1.0
        } else {
            self.hits as f64 / total_requests as f64
        };
        if total_requests >= 50 && hit_rate < 0.5 {
            score -= 15;
            issues.push(format!("low hit rate: {:.1}%", hit_rate * 100.0));
        }

        if self.timeouts > 0 {
            score -= (self.timeouts as i64).min(15);
            issues.push(format!("{} fetch timeouts", self.timeouts));
        }

        let score = score.clamp(0, 100) as u8;
        let status = match score {
            90..=100 => HealthStatus::Excellent,
            70..=89 => HealthStatus::Good,
            40..=69 => HealthStatus::Warning,
            _ => HealthStatus::Critical,
        };

        Health {
            status,
            score,
            issues,
            error_rate,
            recent_errors,
            timeouts: self.timeouts,
        }
    }

    pub fn temporal(&self, now: Instant) -> Temporal {
        let uptime = now.saturating_duration_since(self.created_at);
        let uptime_ms = uptime.as_millis() as u64;

        let total_requests = self.hits + self.misses;
        let minutes = uptime.as_secs_f64() / 60.0;
        let requests_per_minute = if minutes > 0.0 {
            total_requests as f64 / minutes
        } else {
            0.0
        };

        Temporal {
            uptime_ms,
            uptime: format_uptime(uptime),
            requests_per_minute,
            trend: self.trend(),
        }
    }

    /// Compares the two halves of the recent window: responses getting
    /// faster read as improving, getting slower as declining.
    fn trend(&self) -> Trend {
        if self.recent.len() < 10 {
            return Trend::Stable;
        }

        let mid = self.recent.len() / 2;
        let first: f64 = self.recent.iter().take(mid).sum::<f64>() / mid as f64;
        let second: f64 =
            self.recent.iter().skip(mid).sum::<f64>() / (self.recent.len() - mid) as f64;

        if second < first * 0.9 {
            Trend::Improving
        } else if second > first * 1.1 {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

fn push_bounded<T>(window: &mut VecDeque<T>, value: T, cap: usize) {
    if window.len() == cap {
        window.pop_front();
    }
    window.push_back(value);
}

fn average(window: &VecDeque<f64>) -> f64 {
    if window.is_empty() {
        0.0
    } else {
        window.iter().sum::<f64>() / window.len() as f64
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((sorted.len() as f64 * q).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

/// Hit/miss accounting and the time reads saved overall.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Efficiency {
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub time_saved_ms: f64,
}

/// Response-time aggregates over the latency windows, in milliseconds.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub avg_cached_response_time: f64,
    pub avg_fetch_response_time: f64,
    pub performance_gain: f64,
    pub p95_response_time: f64,
    pub fastest_response: f64,
    pub slowest_response: f64,
}

/// Scheduler occupancy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operations {
    pub active_requests: usize,
    pub queued_requests: usize,
    pub concurrency_limit: usize,
    pub rejected_requests: u64,
    pub peak_concurrency: usize,
}

/// Byte accounting against the configured limits.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub current_usage: String,
    pub current_usage_bytes: u64,
    pub usage_percentage: f64,
    pub limit: String,
    pub limit_bytes: u64,
    pub cleanup_count: u64,
    pub memory_reclaimed: String,
    pub memory_reclaimed_bytes: u64,
}

/// Per-entry use-count distribution across the store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub total_items: usize,
    pub avg_item_usage: f64,
    pub max_item_usage: u64,
    pub min_item_usage: u64,
    pub single_use_items: usize,
    pub high_value_items: usize,
}

impl Inventory {
    pub(crate) fn from_uses(uses: &[u64]) -> Self {
        let total_items = uses.len();
        let sum: u64 = uses.iter().sum();
        Self {
            total_items,
            avg_item_usage: if total_items == 0 {
                0.0
            } else {
                sum as f64 / total_items as f64
            },
            max_item_usage: uses.iter().copied().max().unwrap_or(0),
            min_item_usage: uses.iter().copied().min().unwrap_or(0),
            single_use_items: uses.iter().filter(|uses| **uses <= 1).count(),
            high_value_items: uses.iter().filter(|uses| **uses >= HIGH_VALUE_USES).count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    Good,
    Warning,
    Critical,
}

/// A coarse judgement of how the cache is doing, with the reasons.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: HealthStatus,
    pub score: u8,
    pub issues: Vec<String>,
    pub error_rate: f64,
    pub recent_errors: usize,
    pub timeouts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

/// Uptime and request-rate view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Temporal {
    pub uptime_ms: u64,
    pub uptime: String,
    pub requests_per_minute: f64,
    pub trend: Trend,
}

/// The full statistics view returned by
/// [`statistics`](crate::MemoCache::statistics).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub efficiency: Efficiency,
    pub performance: Performance,
    pub operations: Operations,
    pub memory: MemoryStats,
    pub inventory: Inventory,
    pub health: Health,
    pub temporal: Temporal,
}
