use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic broker counters. Only an explicit registry reset zeros them.
#[derive(Debug, Default)]
pub struct Metrics {
    total_connections: AtomicU64,
    events_dispatched: AtomicU64,
    errors: AtomicU64,
    failed_deliveries: AtomicU64,
}

/// Point-in-time view of the broker counters plus the live connection gauge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub active_connections: usize,
    pub total_connections: u64,
    pub events_dispatched: u64,
    pub errors: u64,
    pub failed_deliveries: u64,
}

impl Metrics {
    pub fn bump_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failed_deliveries(&self, count: u64) {
        if count > 0 {
            self.failed_deliveries.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, active_connections: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            active_connections,
            total_connections: self.total_connections.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            failed_deliveries: self.failed_deliveries.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn zero(&self) {
        self.total_connections.store(0, Ordering::Relaxed);
        self.events_dispatched.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.failed_deliveries.store(0, Ordering::Relaxed);
    }
}
