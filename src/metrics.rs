//! Agent Metrics
//!
//! Cache-line aligned reconciliation counters, updated from both the
//! synchronous pass and the background device unit.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size for alignment
pub const CACHE_LINE_SIZE: usize = 64;

/// Reconciliation counters
#[repr(C, align(64))]
#[derive(Debug)]
pub struct AgentMetrics {
    /// Passes that got past the config guard
    pub passes_started: AtomicU64,
    /// Passes turned away because another one was in progress
    pub passes_skipped: AtomicU64,
    /// Slots provisioned or resumed and launched
    pub slots_succeeded: AtomicU64,
    /// Slots that failed anywhere in the pipeline
    pub slots_failed: AtomicU64,
    /// OSDs retired by the pruner
    pub osds_pruned: AtomicU64,
    /// Removals that failed
    pub prune_failures: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
    _padding: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<AgentMetrics>() <= CACHE_LINE_SIZE);

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self {
            passes_started: AtomicU64::new(0),
            passes_skipped: AtomicU64::new(0),
            slots_succeeded: AtomicU64::new(0),
            slots_failed: AtomicU64::new(0),
            osds_pruned: AtomicU64::new(0),
            prune_failures: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
            _padding: [0; 8],
        }
    }

    #[inline]
    pub fn record_pass_started(&self) {
        self.passes_started.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_pass_skipped(&self) {
        self.passes_skipped.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_slot(&self, succeeded: bool) {
        if succeeded {
            self.slots_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.slots_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.touch();
    }

    #[inline]
    pub fn record_removal(&self, succeeded: bool) {
        if succeeded {
            self.osds_pruned.fetch_add(1, Ordering::Relaxed);
        } else {
            self.prune_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.touch();
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    pub fn snapshot(&self) -> AgentMetricsSnapshot {
        AgentMetricsSnapshot {
            passes_started: self.passes_started.load(Ordering::Relaxed),
            passes_skipped: self.passes_skipped.load(Ordering::Relaxed),
            slots_succeeded: self.slots_succeeded.load(Ordering::Relaxed),
            slots_failed: self.slots_failed.load(Ordering::Relaxed),
            osds_pruned: self.osds_pruned.load(Ordering::Relaxed),
            prune_failures: self.prune_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`AgentMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentMetricsSnapshot {
    pub passes_started: u64,
    pub passes_skipped: u64,
    pub slots_succeeded: u64,
    pub slots_failed: u64,
    pub osds_pruned: u64,
    pub prune_failures: u64,
}
