use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Thread-safe throughput and reliability counters.
///
/// Every mutation happens under a single lock, so concurrent workers can
/// record results in any order and the totals come out the same.
#[derive(Debug)]
pub struct ProcessingStats {
    inner: Mutex<StatsInner>,
}

#[derive(Debug)]
struct StatsInner {
    succeeded: u64,
    failed: u64,
    total_time: Duration,
    total_bytes: u64,
    durations: Vec<Duration>,
    started: Instant,
}

impl StatsInner {
    fn new() -> Self {
        Self {
            succeeded: 0,
            failed: 0,
            total_time: Duration::ZERO,
            total_bytes: 0,
            durations: Vec::new(),
            started: Instant::now(),
        }
    }
}

/// Point-in-time copy of [`ProcessingStats`]. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub total: u64,
    /// Percentage of attempted files that succeeded
    pub success_rate: f64,
    pub total_time: f64,
    pub avg_time: f64,
    pub files_per_second: f64,
    pub total_bytes: u64,
    pub runtime: f64,
    pub min_time: f64,
    pub max_time: f64,
}

impl StatsSnapshot {
    pub fn total_megabytes(&self) -> f64 {
        self.total_bytes as f64 / 1024.0 / 1024.0
    }
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner::new()),
        }
    }

    // A panicking worker must not take the counters down with it.
    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_success(&self, duration: Duration, bytes: u64) {
        let mut inner = self.lock();
        inner.succeeded += 1;
        inner.total_time += duration;
        inner.total_bytes += bytes;
        inner.durations.push(duration);
    }

    pub fn record_failure(&self, bytes: u64) {
        let mut inner = self.lock();
        inner.failed += 1;
        inner.total_bytes += bytes;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();

        let total = inner.succeeded + inner.failed;
        let total_time = inner.total_time.as_secs_f64();
        let success_rate = if total == 0 {
            0.0
        } else {
            inner.succeeded as f64 / total as f64 * 100.0
        };
        let avg_time = if inner.durations.is_empty() {
            0.0
        } else {
            total_time / inner.durations.len() as f64
        };
        let files_per_second = if inner.total_time.is_zero() {
            0.0
        } else {
            inner.succeeded as f64 / total_time
        };

        StatsSnapshot {
            succeeded: inner.succeeded,
            failed: inner.failed,
            total,
            success_rate,
            total_time,
            avg_time,
            files_per_second,
            total_bytes: inner.total_bytes,
            runtime: inner.started.elapsed().as_secs_f64(),
            min_time: inner.durations.iter().min().map_or(0.0, Duration::as_secs_f64),
            max_time: inner.durations.iter().max().map_or(0.0, Duration::as_secs_f64),
        }
    }

    /// Zero all counters and restart the runtime clock
    pub fn reset(&self) {
        *self.lock() = StatsInner::new();
    }
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self::new()
    }
}
