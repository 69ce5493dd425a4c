//! In-memory bucket index mirrored to the append-only log.

use std::sync::RwLock;

use crate::persist::{self, Aof, Keys};
use crate::{KvError, Result};

/// The `Store` keeps every key in memory and writes through to the log.
///
/// The index maps `bucket -> id -> value`. It is hydrated from the log by
/// [Store::open] and mutated in lockstep with log appends: a writer takes
/// the write lock, appends the record, and only then touches the map, so
/// log order always matches the order of successful mutations and a failed
/// append leaves the map untouched. Readers share the lock.
pub struct Store {
    aof: Aof,
    buckets: RwLock<Keys>,
}

impl Store {
    /// Open the log at `path` and build the store from its replay.
    pub fn open(path: impl Into<std::path::PathBuf>, sync_interval_ms: u64) -> Result<Store> {
        let (aof, keys) = Aof::open(path, sync_interval_ms)?;
        Ok(Store {
            aof,
            buckets: RwLock::new(keys),
        })
    }

    /// Get the value stored under `(bucket, id)`.
    ///
    /// Returns `None` if the key does not exist.
    pub fn get(&self, bucket: &str, id: u64) -> Option<Vec<u8>> {
        self.buckets
            .read()
            .unwrap()
            .get(bucket)
            .and_then(|entries| entries.get(&id))
            .cloned()
    }

    /// Insert or overwrite `(bucket, id)` with `value`.
    ///
    /// The value must be UTF-8 without embedded newlines; the log format
    /// has no escaping layer.
    pub fn set(&self, bucket: &str, id: u64, value: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(value)
            .map_err(|_| KvError::InvalidArgument("value is not valid UTF-8".to_string()))?;
        if text.contains('\n') {
            return Err(KvError::InvalidArgument(
                "value contains a newline".to_string(),
            ));
        }

        let mut buckets = self.buckets.write().unwrap();
        self.aof.write(&persist::set_record(bucket, id, text))?;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(id, value.to_vec());
        Ok(())
    }

    /// Remove `(bucket, id)`.
    ///
    /// Returns [KvError::KeyNotFound] if the key does not exist.
    pub fn del(&self, bucket: &str, id: u64) -> Result<()> {
        let mut buckets = self.buckets.write().unwrap();
        let present = buckets
            .get(bucket)
            .map_or(false, |entries| entries.contains_key(&id));
        if !present {
            return Err(KvError::KeyNotFound);
        }

        self.aof.write(&persist::del_record(bucket, id))?;
        if let Some(entries) = buckets.get_mut(bucket) {
            entries.remove(&id);
        }
        Ok(())
    }

    /// Clone the current index.
    pub fn snapshot(&self) -> Keys {
        self.buckets.read().unwrap().clone()
    }

    /// Compact the log down to one `set` record per live key.
    ///
    /// Writers are held off for the duration so the rewritten file matches
    /// the index exactly.
    pub fn defrag(&self) -> Result<()> {
        let buckets = self.buckets.write().unwrap();
        self.aof.defrag(&buckets)
    }

    /// Flush and close the underlying log. Mutations after this fail.
    pub fn close(&self) -> Result<()> {
        self.aof.close()
    }
}
