//! In-memory KV store implementation using `DashMap`.
//!
//! This is the default backend for tests and single-process use - data is
//! lost on process restart. For persistence, use `FileKvStore`.

use super::{decode_f64, encode_f64, CasOutcome, KvStore};
use crate::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// In-memory key-value store using lock-free concurrent hashmap.
///
/// Thread-safe and optimized for high-concurrency read/write workloads.
/// Atomic operations run under the key's `DashMap` entry lock.
///
/// # Example
///
/// ```rust
/// use abtest_core::kv::{KvStore, MemoryKvStore};
///
/// # async fn example() -> abtest_core::Result<()> {
/// let store = MemoryKvStore::new();
/// store.set("hello", b"world".to_vec()).await?;
/// assert_eq!(store.get("hello").await?, Some(b"world".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryKvStore {
    store: DashMap<String, Vec<u8>>,
}

impl MemoryKvStore {
    /// Create a new in-memory KV store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }

    /// Get the number of entries in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.store.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.store.contains_key(key))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries: Vec<(String, Vec<u8>)> = self
            .store
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<CasOutcome> {
        match self.store.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if expected == Some(occupied.get().as_slice()) {
                    occupied.insert(new);
                    Ok(CasOutcome::Swapped)
                } else {
                    Ok(CasOutcome::Conflict(Some(occupied.get().clone())))
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(new);
                    Ok(CasOutcome::Swapped)
                } else {
                    Ok(CasOutcome::Conflict(None))
                }
            }
        }
    }

    async fn increment(&self, key: &str, delta: f64) -> Result<f64> {
        let mut cell = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| encode_f64(0.0));
        let total = decode_f64(cell.value())? + delta;
        *cell.value_mut() = encode_f64(total);
        Ok(total)
    }
}
