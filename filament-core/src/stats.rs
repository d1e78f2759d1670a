//! Per-signature invocation statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Concurrent counters for one dispatch target.
///
/// Recorded by server workers after every invocation; tolerates concurrent
/// increments from many workers.
#[derive(Debug, Default)]
pub struct MethodStats {
    calls: AtomicU64,
    errors: AtomicU64,
    total_micros: AtomicU64,
}

impl MethodStats {
    /// Records one invocation's timing and outcome.
    pub fn record(&self, start: Instant, end: Instant, success: bool) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        let elapsed = end.duration_since(start).as_micros() as u64;
        self.total_micros.fetch_add(elapsed, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Takes a point-in-time snapshot labeled with the target's signature.
    pub fn snapshot(&self, signature: &str) -> MethodStatsSnapshot {
        MethodStatsSnapshot {
            signature: signature.to_string(),
            calls: self.calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_micros: self.total_micros.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of one target's counters, for display by ops tooling.
#[derive(Debug, Clone, Serialize)]
pub struct MethodStatsSnapshot {
    pub signature: String,
    pub calls: u64,
    pub errors: u64,
    pub total_micros: u64,
}

/// External collaborator notified after every server-side invocation.
pub trait StatsSink: Send + Sync {
    fn on_invocation_recorded(&self, signature: &str, start: Instant, end: Instant, success: bool);
}
