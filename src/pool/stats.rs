//! Pool statistics
//!
//! Counters are plain atomics so they can be bumped on the hot path without
//! the pool mutex and read by balancers at any time.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Point-in-time view of a pool's health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Number of times an idle connection was reused
    pub hits: u32,
    /// Number of times a fresh connection had to be dialed
    pub misses: u32,
    /// Number of times waiting for an admission slot timed out
    pub timeouts: u32,

    /// Connections currently tracked (idle and checked out)
    pub total_conns: usize,
    /// Connections currently idle
    pub idle_conns: usize,
    /// Connections closed because the idle list was full
    pub stale_conns: u32,
    /// Connections closed because they failed validation
    pub invalid_conns: u32,
    /// Connections currently checked out
    pub in_use_conns: usize,
}

impl PoolStats {
    /// Connections checked out right now
    pub fn active_conns(&self) -> usize {
        self.in_use_conns
    }

    /// Fraction of `get` calls served from the idle list
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicPoolStats {
    hits: AtomicU32,
    misses: AtomicU32,
    timeouts: AtomicU32,
    stale_conns: AtomicU32,
    invalid_conns: AtomicU32,
    in_use_conns: AtomicUsize,
}

impl AtomicPoolStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self) {
        self.stale_conns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalid(&self) {
        self.invalid_conns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn checkout(&self) {
        self.in_use_conns.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn checkin(&self) {
        // Saturate so a stray double release cannot wrap the gauge
        let _ = self
            .in_use_conns
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn in_use(&self) -> usize {
        self.in_use_conns.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self, total_conns: usize, idle_conns: usize) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            total_conns,
            idle_conns,
            stale_conns: self.stale_conns.load(Ordering::Relaxed),
            invalid_conns: self.invalid_conns.load(Ordering::Relaxed),
            in_use_conns: self.in_use(),
        }
    }
}
