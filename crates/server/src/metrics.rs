//! Save pipeline counters.
//!
//! Updated with relaxed atomics from the service thread, the save worker and
//! blocking savers. Read through `snapshot()` for logging.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

pub struct SaveMetrics {
    // Monotonic counters
    requests: AtomicU64,
    coalesced: AtomicU64,
    full_writes: AtomicU64,
    incremental_writes: AtomicU64,
    failures: AtomicU64,
    plots_written: AtomicU64,
    write_ns_sum: AtomicU64,

    // Gauges
    last_write_ns: AtomicU64,

    started_at: Instant,
}

/// Which storage call a write used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Full,
    Incremental,
}

impl SaveMetrics {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            full_writes: AtomicU64::new(0),
            incremental_writes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            plots_written: AtomicU64::new(0),
            write_ns_sum: AtomicU64::new(0),
            last_write_ns: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Relaxed);
    }

    /// A job replaced one still waiting in the pending slot.
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Relaxed);
    }

    pub fn record_write(&self, kind: WriteKind, plots: usize, duration: Duration) {
        match kind {
            WriteKind::Full => self.full_writes.fetch_add(1, Relaxed),
            WriteKind::Incremental => self.incremental_writes.fetch_add(1, Relaxed),
        };
        self.plots_written.fetch_add(plots as u64, Relaxed);
        let ns = duration.as_nanos() as u64;
        self.write_ns_sum.fetch_add(ns, Relaxed);
        self.last_write_ns.store(ns, Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Relaxed);
    }

    pub fn writes(&self) -> u64 {
        self.full_writes.load(Relaxed) + self.incremental_writes.load(Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            requests: self.requests.load(Relaxed),
            coalesced: self.coalesced.load(Relaxed),
            full_writes: self.full_writes.load(Relaxed),
            incremental_writes: self.incremental_writes.load(Relaxed),
            failures: self.failures.load(Relaxed),
            plots_written: self.plots_written.load(Relaxed),
            write_ns_sum: self.write_ns_sum.load(Relaxed),
            last_write_ns: self.last_write_ns.load(Relaxed),
        }
    }
}

impl Default for SaveMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of the counters at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub requests: u64,
    pub coalesced: u64,
    pub full_writes: u64,
    pub incremental_writes: u64,
    pub failures: u64,
    pub plots_written: u64,
    pub write_ns_sum: u64,
    pub last_write_ns: u64,
}
