//! Key-Value Store Module: the persistence contract behind the experiment store
//!
//! Provides a small async key-value contract with the atomic primitives the
//! experiment layer depends on:
//! - compare-and-set (`compare_and_swap`, `put_if_absent`) for first-write-wins keys
//! - atomic numeric increment (`increment`) for outcome counters
//! - ordered prefix scans (`scan_prefix`) for collections
//!
//! Two backends ship with the crate: [`MemoryKvStore`] (process lifetime) and
//! [`FileKvStore`] (append-only log, durable across restarts).
//!
//! # Example
//!
//! ```rust,no_run
//! use abtest_core::kv::{KvStore, MemoryKvStore};
//!
//! # async fn example() -> abtest_core::Result<()> {
//! let store = MemoryKvStore::new();
//!
//! // Basic operations
//! store.set("key", b"value".to_vec()).await?;
//! let value = store.get("key").await?;
//! assert_eq!(value, Some(b"value".to_vec()));
//!
//! // First write wins
//! let first = store.put_if_absent("owner", b"a".to_vec()).await?;
//! let second = store.put_if_absent("owner", b"b".to_vec()).await?;
//! assert!(first.was_inserted());
//! assert_eq!(second.value(), b"a");
//!
//! // Atomic counters
//! store.increment("hits", 1.0).await?;
//! assert_eq!(store.increment("hits", 2.0).await?, 3.0);
//! # Ok(())
//! # }
//! ```

mod file;
mod memory;

pub use file::FileKvStore;
pub use memory::MemoryKvStore;

use crate::{Error, Result};
use std::future::Future;

/// Outcome of a compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The expected value matched and the new value was written.
    Swapped,
    /// The expected value did not match; carries the value actually stored.
    Conflict(Option<Vec<u8>>),
}

/// Outcome of a `put_if_absent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key was vacant and now holds the supplied value.
    Inserted(Vec<u8>),
    /// The key already held a value; the supplied one was discarded.
    Existing(Vec<u8>),
}

impl PutOutcome {
    /// The value now stored under the key.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        match self {
            Self::Inserted(v) | Self::Existing(v) => v,
        }
    }

    /// Consume the outcome, returning the stored value.
    #[must_use]
    pub fn into_value(self) -> Vec<u8> {
        match self {
            Self::Inserted(v) | Self::Existing(v) => v,
        }
    }

    /// Whether this call performed the write.
    #[must_use]
    pub const fn was_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Key-value store trait backing the experiment store.
///
/// Implementations must make `compare_and_swap` and `increment` atomic with
/// respect to every other mutation of the same key. A read-check-then-write
/// sequence in the caller is never an acceptable substitute.
pub trait KvStore: Send + Sync {
    /// Get a value by key.
    ///
    /// Returns `None` if the key doesn't exist.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Set a value for a key.
    ///
    /// Overwrites any existing value.
    fn set(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Delete a key.
    ///
    /// No-op if the key doesn't exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check if a key exists.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// All entries whose key starts with `prefix`, ordered by key.
    fn scan_prefix(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<(String, Vec<u8>)>>> + Send;

    /// Atomically replace the value under `key` if it currently equals
    /// `expected` (`None` meaning "key absent").
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> impl Future<Output = Result<CasOutcome>> + Send;

    /// Atomically add `delta` to the f64 counter under `key` and return the
    /// new total. A missing key counts as `0.0`.
    ///
    /// Counter cells hold 8 little-endian bytes (see [`encode_f64`]); any
    /// other cell content is rejected with `Error::InvalidInput`.
    fn increment(&self, key: &str, delta: f64) -> impl Future<Output = Result<f64>> + Send;

    /// Write `value` only if `key` is vacant.
    ///
    /// Every caller observes the same final value: the winner gets
    /// `Inserted`, everyone else gets `Existing` with the winner's value.
    fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> impl Future<Output = Result<PutOutcome>> + Send {
        async move {
            loop {
                match self.compare_and_swap(key, None, value.clone()).await? {
                    CasOutcome::Swapped => return Ok(PutOutcome::Inserted(value)),
                    CasOutcome::Conflict(Some(existing)) => {
                        return Ok(PutOutcome::Existing(existing))
                    }
                    // Deleted between the failed swap and the report; try again.
                    CasOutcome::Conflict(None) => {}
                }
            }
        }
    }

    /// Get multiple keys in a batch.
    ///
    /// Returns values in the same order as keys. Missing keys return `None`.
    fn batch_get(
        &self,
        keys: &[&str],
    ) -> impl Future<Output = Result<Vec<Option<Vec<u8>>>>> + Send {
        async move {
            let mut results = Vec::with_capacity(keys.len());
            for key in keys {
                results.push(self.get(key).await?);
            }
            Ok(results)
        }
    }
}

/// Encode a counter value as stored by [`KvStore::increment`].
#[must_use]
pub fn encode_f64(value: f64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// Decode a counter cell written by [`KvStore::increment`].
///
/// # Errors
///
/// Returns `Error::InvalidInput` if the cell is not exactly 8 bytes.
pub fn decode_f64(bytes: &[u8]) -> Result<f64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        Error::InvalidInput(format!(
            "counter cell must be 8 bytes, found {} bytes",
            bytes.len()
        ))
    })?;
    Ok(f64::from_le_bytes(raw))
}
