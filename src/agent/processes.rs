//! Local Process Cache
//!
//! Tracks handles of OSD processes this agent instance launched. It is a
//! cache, not a source of truth: after a restart it is empty even though
//! OSDs are applied, and "not tracked" always means "launch again".

use crate::domain::ports::ProcessHandle;
use dashmap::DashMap;

/// Concurrent `osd id -> process handle` map
#[derive(Debug, Default)]
pub struct ProcessCache {
    procs: DashMap<u32, ProcessHandle>,
}

impl ProcessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly started process, replacing any previous handle
    pub fn insert(&self, osd_id: u32, handle: ProcessHandle) {
        self.procs.insert(osd_id, handle);
    }

    pub fn remove(&self, osd_id: u32) -> Option<ProcessHandle> {
        self.procs.remove(&osd_id).map(|(_, handle)| handle)
    }

    pub fn get(&self, osd_id: u32) -> Option<ProcessHandle> {
        self.procs.get(&osd_id).map(|r| r.value().clone())
    }

    pub fn contains(&self, osd_id: u32) -> bool {
        self.procs.contains_key(&osd_id)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Tracked ids in ascending order
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.procs.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Remove and return every tracked handle
    pub fn drain(&self) -> Vec<(u32, ProcessHandle)> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.remove(id).map(|h| (id, h)))
            .collect()
    }
}
