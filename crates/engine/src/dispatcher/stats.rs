use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Cycles currently holding a worker permit.
    pub active_workers: usize,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub cycles_panicked: u64,
    /// Due triggers skipped because their previous cycle was still in flight.
    pub skipped_in_flight: u64,
    /// Longest observed wait for a worker permit.
    pub max_permit_wait_ms: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    active_workers: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    skipped: AtomicU64,
    max_wait_ms: AtomicU64,
}

impl StatsRecorder {
    pub fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_finished(&self) {
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn permit_wait(&self, waited: Duration) {
        let ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
        self.max_wait_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            active_workers: self.active_workers.load(Ordering::Relaxed),
            cycles_completed: self.completed.load(Ordering::Relaxed),
            cycles_failed: self.failed.load(Ordering::Relaxed),
            cycles_panicked: self.panicked.load(Ordering::Relaxed),
            skipped_in_flight: self.skipped.load(Ordering::Relaxed),
            max_permit_wait_ms: self.max_wait_ms.load(Ordering::Relaxed),
        }
    }
}
