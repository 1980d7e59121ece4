//! In-process key/value store with blocking-query semantics.

use super::{BlockingQuery, KvClient, KvListing, KvPair};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::watch;
use tokio::time::Instant;

/// Key/value store held in memory.
///
/// Every write bumps a modification index, and blocking scans wait for the
/// index to move past the caller's last observed value, the same way a
/// networked store answers long-poll requests. Useful for tests and for
/// embedding a store in a single process.
pub struct MemoryKv {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    index: watch::Sender<u64>,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        // Index 0 means "never observed", so scans with it never block
        let (index, _) = watch::channel(1);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            index,
        }
    }

    /// Write `key` unconditionally.
    pub fn put(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.lock().insert(key.into(), value.into());
        self.bump();
    }

    /// Delete `key`. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        let existed = self.entries.lock().remove(key).is_some();
        if existed {
            self.bump();
        }
        existed
    }

    /// Read one raw value.
    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }

    /// Current modification index.
    pub fn index(&self) -> u64 {
        *self.index.borrow()
    }

    fn bump(&self) {
        self.index.send_modify(|index| *index += 1);
    }

    fn scan(&self, prefix: &str) -> KvListing {
        let entries = self.entries.lock();
        let pairs = entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KvPair::new(key.clone(), value.clone()))
            .collect();
        KvListing {
            pairs,
            index: self.index(),
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn list(&self, prefix: &str, query: Option<BlockingQuery>) -> Result<KvListing> {
        if let Some(query) = query {
            let deadline = Instant::now() + query.wait;
            let mut changes = self.index.subscribe();
            loop {
                let current = *changes.borrow_and_update();
                if current > query.index || query.index == 0 {
                    break;
                }
                if tokio::time::timeout_at(deadline, changes.changed())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
        Ok(self.scan(prefix))
    }

    async fn insert(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        {
            let mut entries = self.entries.lock();
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(key.to_string(), value);
        }
        self.bump();
        Ok(true)
    }
}
