//! In-Memory Desired-State Store
//!
//! Hierarchical key-value store with directory semantics, backed by an
//! ordered map of leaf keys. Used in standalone mode and by tests.

use crate::domain::ports::{KeyValueStore, StoreNode};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory hierarchical store
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Leaf keys and their values
    entries: RwLock<BTreeMap<String, String>>,
    /// Number of successful writes and deletes
    write_count: AtomicU64,
    /// Fail every read with a store error
    fail_reads: AtomicBool,
    /// Fail writes to keys containing this substring
    fail_writes: RwLock<Option<String>>,
}

fn normalize(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn dir_prefix(key: &str) -> String {
    format!("{}/", key)
}

fn build_node(key: String, entries: Vec<(&str, &str)>) -> StoreNode {
    let mut children = Vec::new();
    let mut dirs: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();

    for (relative, value) in entries {
        match relative.split_once('/') {
            None => children.push(StoreNode {
                key: format!("{}/{}", key, relative),
                value: Some(value.to_string()),
                children: Vec::new(),
            }),
            Some((head, rest)) => dirs.entry(head).or_default().push((rest, value)),
        }
    }

    for (head, sub) in dirs {
        children.push(build_node(format!("{}/{}", key, head), sub));
    }
    children.sort_by(|a, b| a.key.cmp(&b.key));

    StoreNode {
        key,
        value: None,
        children,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes and deletes so far
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Number of leaf keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Fault injection: fail every read
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Fault injection: fail writes to keys containing `pattern`
    pub fn fail_writes_matching(&self, pattern: Option<String>) {
        *self.fail_writes.write() = pattern;
    }

    fn check_read(&self, key: &str) -> Result<()> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(Error::store(key, "injected read failure"));
        }
        Ok(())
    }

    fn check_write(&self, key: &str) -> Result<()> {
        if let Some(pattern) = self.fail_writes.read().as_deref() {
            if key.contains(pattern) {
                return Err(Error::store(key, "injected write failure"));
            }
        }
        Ok(())
    }

    fn is_dir(entries: &BTreeMap<String, String>, key: &str) -> bool {
        let prefix = dir_prefix(key);
        entries
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<String> {
        let key = normalize(key);
        self.check_read(&key)?;

        let entries = self.entries.read();
        if let Some(value) = entries.get(&key) {
            return Ok(value.clone());
        }
        if Self::is_dir(&entries, &key) {
            return Err(Error::store(key, "key is a directory"));
        }
        Err(Error::KeyNotFound { key })
    }

    async fn get_tree(&self, key: &str) -> Result<StoreNode> {
        let key = normalize(key);
        self.check_read(&key)?;

        let entries = self.entries.read();
        if let Some(value) = entries.get(&key) {
            return Ok(StoreNode {
                key,
                value: Some(value.clone()),
                children: Vec::new(),
            });
        }

        let prefix = dir_prefix(&key);
        let below: Vec<(&str, &str)> = entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (&k[prefix.len()..], v.as_str()))
            .collect();

        if below.is_empty() {
            return Err(Error::KeyNotFound { key });
        }
        Ok(build_node(key, below))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let key = normalize(key);
        self.check_write(&key)?;

        let mut entries = self.entries.write();
        if Self::is_dir(&entries, &key) {
            return Err(Error::store(key, "key is a directory"));
        }

        // no ancestor may be a leaf
        let mut ancestor = key.as_str();
        while let Some((parent, _)) = ancestor.rsplit_once('/') {
            if parent.is_empty() {
                break;
            }
            if entries.contains_key(parent) {
                return Err(Error::store(key.clone(), format!("{} is not a directory", parent)));
            }
            ancestor = parent;
        }

        entries.insert(key, value.to_string());
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let key = normalize(key);
        self.check_write(&key)?;

        let mut entries = self.entries.write();
        if entries.remove(&key).is_some() {
            self.write_count.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        if !Self::is_dir(&entries, &key) {
            return Err(Error::KeyNotFound { key });
        }
        if !recursive {
            return Err(Error::store(key, "directory not empty"));
        }

        let prefix = dir_prefix(&key);
        entries.retain(|k, _| !k.starts_with(&prefix));
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
