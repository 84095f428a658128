//! Durable KV store: `DashMap` cache in front of an append-only JSON-lines log.
//!
//! Every mutation is appended to the log before it becomes visible in the
//! cache. Mutations are serialized through the log writer, so the order of
//! records in the file is the order in which they were applied. Opening a
//! store replays the log; `compact` rewrites it as a snapshot.
//!
//! Lock order is always log writer first, then the key's cache entry.

use super::{decode_f64, encode_f64, CasOutcome, KvStore};
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// One line of the log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LogRecord {
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
}

/// Key-value store persisted to a single log file.
///
/// # Example
///
/// ```rust,no_run
/// use abtest_core::kv::{FileKvStore, KvStore};
///
/// # async fn example() -> abtest_core::Result<()> {
/// let store = FileKvStore::open("experiments.log")?;
/// store.set("hello", b"world".to_vec()).await?;
/// drop(store);
///
/// let reopened = FileKvStore::open("experiments.log")?;
/// assert_eq!(reopened.get("hello").await?, Some(b"world".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
    cache: DashMap<String, Vec<u8>>,
    log: Mutex<BufWriter<File>>,
    fsync: bool,
}

impl FileKvStore {
    /// Open (or create) the store at `path`, replaying any existing log.
    ///
    /// A torn final line (crash mid-append) is dropped with a warning and the
    /// log is compacted so later appends start on a clean line.
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageUnavailable` if the file cannot be read or
    /// created, or if a line other than the last one is corrupt.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let cache = DashMap::new();
        let mut torn_tail = false;

        if path.exists() {
            let file = File::open(&path).map_err(|e| storage_error(&path, &e))?;
            let lines: Vec<String> = BufReader::new(file)
                .lines()
                .collect::<std::io::Result<_>>()
                .map_err(|e| storage_error(&path, &e))?;
            let last = lines.len().saturating_sub(1);

            for (index, line) in lines.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogRecord>(line) {
                    Ok(LogRecord::Set { key, value }) => {
                        cache.insert(key, value);
                    }
                    Ok(LogRecord::Delete { key }) => {
                        cache.remove(&key);
                    }
                    Err(e) if index == last => {
                        warn!(path = %path.display(), error = %e, "dropping torn log tail");
                        torn_tail = true;
                    }
                    Err(e) => {
                        return Err(Error::StorageUnavailable(format!(
                            "corrupt log record at {}:{}: {e}",
                            path.display(),
                            index + 1
                        )));
                    }
                }
            }
            debug!(path = %path.display(), entries = cache.len(), "replayed log");
        }

        let file = open_append(&path)?;
        let store = Self {
            path,
            cache,
            log: Mutex::new(BufWriter::new(file)),
            fsync: false,
        };
        if torn_tail {
            store.compact()?;
        }
        Ok(store)
    }

    /// Call `fsync` after every append instead of only flushing to the OS.
    #[must_use]
    pub const fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// Path of the backing log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Rewrite the log as one `set` record per live key.
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageUnavailable` if the snapshot cannot be written.
    pub fn compact(&self) -> Result<()> {
        let mut log = self.lock_log()?;

        let mut snapshot: Vec<(String, Vec<u8>)> = self
            .cache
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));

        let tmp_path = self.path.with_extension("compact");
        {
            let tmp = File::create(&tmp_path).map_err(|e| storage_error(&tmp_path, &e))?;
            let mut writer = BufWriter::new(tmp);
            for (key, value) in snapshot {
                let line = serde_json::to_string(&LogRecord::Set { key, value })?;
                writeln!(writer, "{line}").map_err(|e| storage_error(&tmp_path, &e))?;
            }
            writer.flush().map_err(|e| storage_error(&tmp_path, &e))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| storage_error(&tmp_path, &e))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|e| storage_error(&self.path, &e))?;

        *log = BufWriter::new(open_append(&self.path)?);
        debug!(path = %self.path.display(), entries = self.cache.len(), "compacted log");
        Ok(())
    }

    fn lock_log(&self) -> Result<MutexGuard<'_, BufWriter<File>>> {
        self.log
            .lock()
            .map_err(|_| Error::StorageUnavailable("log writer poisoned by a panic".to_string()))
    }

    fn append(&self, log: &mut BufWriter<File>, record: &LogRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(log, "{line}")
            .and_then(|()| log.flush())
            .map_err(|e| storage_error(&self.path, &e))?;
        if self.fsync {
            log.get_ref()
                .sync_data()
                .map_err(|e| storage_error(&self.path, &e))?;
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| storage_error(path, &e))
}

fn storage_error(path: &Path, e: &std::io::Error) -> Error {
    Error::StorageUnavailable(format!("{}: {e}", path.display()))
}

impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.cache.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut log = self.lock_log()?;
        let record = LogRecord::Set {
            key: key.to_string(),
            value,
        };
        self.append(&mut log, &record)?;
        if let LogRecord::Set { key, value } = record {
            self.cache.insert(key, value);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut log = self.lock_log()?;
        if let Entry::Occupied(occupied) = self.cache.entry(key.to_string()) {
            self.append(
                &mut log,
                &LogRecord::Delete {
                    key: key.to_string(),
                },
            )?;
            occupied.remove();
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.cache.contains_key(key))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries: Vec<(String, Vec<u8>)> = self
            .cache
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
        let mut log = self.lock_log()?;
        match self.cache.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if expected != Some(occupied.get().as_slice()) {
                    return Ok(CasOutcome::Conflict(Some(occupied.get().clone())));
                }
                self.append(
                    &mut log,
                    &LogRecord::Set {
                        key: key.to_string(),
                        value: new.clone(),
                    },
                )?;
                occupied.insert(new);
                Ok(CasOutcome::Swapped)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(CasOutcome::Conflict(None));
                }
                self.append(
                    &mut log,
                    &LogRecord::Set {
                        key: key.to_string(),
                        value: new.clone(),
                    },
                )?;
                vacant.insert(new);
                Ok(CasOutcome::Swapped)
            }
        }
    }

    async fn increment(&self, key: &str, delta: f64) -> Result<f64> {
        let mut log = self.lock_log()?;
        let current = match self.cache.get(key) {
            Some(cell) => decode_f64(cell.value())?,
            None => 0.0,
        };
        let total = current + delta;
        let value = encode_f64(total);
        self.append(
            &mut log,
            &LogRecord::Set {
                key: key.to_string(),
                value: value.clone(),
            },
        )?;
        self.cache.insert(key.to_string(), value);
        Ok(total)
    }
}
