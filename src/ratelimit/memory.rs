//! In-process counter store.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::{CounterStore, StorageError};

/// Counter store backed by a concurrent hash map.
///
/// Clones share the same counters. Entries from past windows are left in
/// place; the engine never addresses them again.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    counters: Arc<DashMap<String, u64>>,
    atomic: bool,
}

impl MemoryStore {
    /// Create a store with an atomic increment.
    pub fn new() -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
            atomic: true,
        }
    }

    /// Create a store that only supports read and write, so the engine uses
    /// its non-atomic read-then-write path.
    pub fn read_write_only() -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
            atomic: false,
        }
    }

    /// Whether `increment` is served atomically.
    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    /// Number of stored counters, including stale windows.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop every counter.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<u64>, StorageError> {
        Ok(self.counters.get(key).map(|v| *v))
    }

    async fn write(&self, key: &str, value: u64) -> Result<(), StorageError> {
        self.counters.insert(key.to_string(), value);
        Ok(())
    }

    async fn increment(&self, key: &str, amount: u64) -> Result<Option<u64>, StorageError> {
        if !self.atomic {
            return Ok(None);
        }

        // The entry guard holds the shard lock for the whole update
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        let next = entry.saturating_add(amount);
        *entry = next;
        Ok(Some(next))
    }

    async fn decrement(&self, key: &str, amount: u64) -> Result<Option<u64>, StorageError> {
        if !self.atomic {
            return Ok(None);
        }

        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        let next = entry.saturating_sub(amount);
        *entry = next;
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_absent_reads_none() {
        let store = MemoryStore::new();
        assert_eq!(assert_ok!(store.read("missing").await), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let store = MemoryStore::new();
        assert_ok!(store.write("k", 3).await);
        assert_eq!(assert_ok!(store.read("k").await), Some(3));

        assert_ok!(store.write("k", 0).await);
        assert_eq!(assert_ok!(store.read("k").await), Some(0));
    }

    #[tokio::test]
    async fn test_atomic_increment() {
        let store = MemoryStore::new();
        assert_eq!(assert_ok!(store.increment("k", 2).await), Some(2));
        assert_eq!(assert_ok!(store.increment("k", 5).await), Some(7));
        assert_eq!(assert_ok!(store.read("k").await), Some(7));
    }

    #[tokio::test]
    async fn test_atomic_decrement_saturates() {
        let store = MemoryStore::new();
        assert_eq!(assert_ok!(store.increment("k", 5).await), Some(5));
        assert_eq!(assert_ok!(store.decrement("k", 2).await), Some(3));
        assert_eq!(assert_ok!(store.decrement("k", 10).await), Some(0));
    }

    #[tokio::test]
    async fn test_read_write_only_has_no_increment() {
        let store = MemoryStore::read_write_only();
        assert!(!store.is_atomic());
        assert_eq!(assert_ok!(store.increment("k", 2).await), None);
        assert_eq!(assert_ok!(store.decrement("k", 2).await), None);
        assert_eq!(assert_ok!(store.read("k").await), None);
    }

    #[tokio::test]
    async fn test_clones_share_counters() {
        let store = MemoryStore::new();
        let other = store.clone();

        assert_ok!(store.write("k", 4).await);
        assert_eq!(assert_ok!(other.read("k").await), Some(4));

        other.clear();
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = MemoryStore::new();
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment("k", 1).await })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            assert_ok!(assert_ok!(task));
        }

        assert_eq!(assert_ok!(store.read("k").await), Some(50));
    }
}
