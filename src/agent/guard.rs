//! Config Guard
//!
//! Single-flight gate for reconciliation passes. Overlapping triggers
//! collapse into one winner; the others return immediately instead of
//! queuing. Background work dispatched by the winner holds its own permit so
//! later triggers keep seeing "in progress" until it finishes.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Atomic reentrancy counter
#[derive(Debug, Default)]
pub struct ConfigGuard {
    counter: AtomicI32,
}

impl ConfigGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enter the critical section if nothing else holds it.
    ///
    /// The permit releases on drop, on every exit path.
    pub fn try_enter(self: &Arc<Self>) -> Option<ConfigPermit> {
        let previous = self.counter.fetch_add(1, Ordering::AcqRel);
        if previous > 0 {
            let counter = self.counter.fetch_sub(1, Ordering::AcqRel) - 1;
            debug!(counter, "osd configuration is already running");
            return None;
        }
        Some(ConfigPermit {
            guard: Arc::clone(self),
        })
    }

    /// Unconditionally take an extra permit, for background work started by
    /// a pass that already holds one.
    pub fn hold(self: &Arc<Self>) -> ConfigPermit {
        self.counter.fetch_add(1, Ordering::AcqRel);
        ConfigPermit {
            guard: Arc::clone(self),
        }
    }

    pub fn count(&self) -> i32 {
        self.counter.load(Ordering::Acquire)
    }

    pub fn in_progress(&self) -> bool {
        self.count() > 0
    }

    fn exit(&self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Scoped ownership of the config guard
#[derive(Debug)]
#[must_use = "the guard is released as soon as the permit is dropped"]
pub struct ConfigPermit {
    guard: Arc<ConfigGuard>,
}

impl Drop for ConfigPermit {
    fn drop(&mut self) {
        self.guard.exit();
    }
}
