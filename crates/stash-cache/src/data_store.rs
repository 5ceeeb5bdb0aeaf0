//! A TTL-keyed small-value store backed by one JSON file per key.
//!
//! Used to memoize program identities (a `--version` probe per compilation
//! would dominate hit latency). Items expire by wall-clock TTL and are
//! lazily deleted when read after expiry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stash_core::fs::{atomic_write, now_millis, remove_file_best_effort};

use crate::error::Result;
use crate::lock::FileLock;

const DATA_STORE_SCHEMA_VERSION: u32 = 1;
const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Serialize, Deserialize)]
struct StoredItem {
    schema_version: u32,
    written_at_millis: u64,
    ttl_secs: u64,
    value: String,
}

/// A directory of TTL-stamped key/value items.
#[derive(Debug)]
pub struct DataStore {
    root: PathBuf,
    lock_timeout: Duration,
    read_only: bool,
}

impl DataStore {
    pub fn new(root: impl Into<PathBuf>, lock_timeout: Duration, read_only: bool) -> Self {
        Self {
            root: root.into(),
            lock_timeout,
            read_only,
        }
    }

    /// Returns the stored value if the item exists and has not expired.
    ///
    /// Expired or unreadable items are deleted on the way out (unless the
    /// store is read-only). Any error degrades to `None`.
    pub fn get(&self, key: &str) -> Option<String> {
        let path = self.item_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::debug!(
                    target = "stash.datastore",
                    path = %path.display(),
                    error = %err,
                    "failed to read data store item"
                );
                return None;
            }
        };

        let item: StoredItem = match serde_json::from_slice(&bytes) {
            Ok(item) => item,
            Err(err) => {
                tracing::debug!(
                    target = "stash.datastore",
                    path = %path.display(),
                    error = %err,
                    "corrupt data store item"
                );
                self.delete_item(&path, "corrupt");
                return None;
            }
        };

        if item.schema_version != DATA_STORE_SCHEMA_VERSION {
            self.delete_item(&path, "schema_mismatch");
            return None;
        }

        let age_millis = now_millis().saturating_sub(item.written_at_millis);
        if age_millis >= item.ttl_secs.saturating_mul(1000) {
            self.delete_item(&path, "expired");
            return None;
        }

        Some(item.value)
    }

    /// Stores `value` under `key` with the given TTL. Atomic write under the
    /// store lock.
    pub fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        if self.read_only {
            return Ok(());
        }

        let item = StoredItem {
            schema_version: DATA_STORE_SCHEMA_VERSION,
            written_at_millis: now_millis(),
            ttl_secs,
            value: value.to_string(),
        };
        let bytes = serde_json::to_vec(&item)?;

        let _lock = FileLock::acquire(&self.root.join(LOCK_FILENAME), self.lock_timeout)?;
        atomic_write(&self.item_path(key), &bytes)?;
        Ok(())
    }

    /// Deletes every expired or unreadable item. Called from housekeeping.
    pub fn sweep(&self) -> Result<usize> {
        if self.read_only {
            return Ok(0);
        }
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let _lock = FileLock::acquire(&self.root.join(LOCK_FILENAME), self.lock_timeout)?;
        let now = now_millis();
        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(".stash-wip.") {
                    remove_file_best_effort(&path, "datastore.stage_leftover");
                }
                continue;
            }
            let expired = match std::fs::read(&path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<StoredItem>(&bytes).ok())
            {
                Some(item) => {
                    now.saturating_sub(item.written_at_millis) >= item.ttl_secs.saturating_mul(1000)
                }
                // Unreadable counts as expired.
                None => true,
            };
            if expired && remove_file_best_effort(&path, "datastore.sweep") {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn item_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn delete_item(&self, path: &Path, stage: &'static str) {
        if self.read_only {
            return;
        }
        let Ok(_lock) = FileLock::acquire(&self.root.join(LOCK_FILENAME), self.lock_timeout) else {
            return;
        };
        tracing::debug!(
            target = "stash.datastore",
            path = %path.display(),
            stage,
            "deleting data store item"
        );
        remove_file_best_effort(path, stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> DataStore {
        DataStore::new(dir, Duration::from_secs(1), false)
    }

    #[test]
    fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.put("abc123", "gcc (GCC) 13.2.0", 300).unwrap();
        assert_eq!(store.get("abc123").as_deref(), Some("gcc (GCC) 13.2.0"));
    }

    #[test]
    fn missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(store(dir.path()).get("nope"), None);
    }

    #[test]
    fn expired_item_is_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.put("key", "value", 0).unwrap();
        assert_eq!(store.get("key"), None);
        assert!(!dir.path().join("key.json").exists());
    }

    #[test]
    fn corrupt_item_is_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        assert_eq!(store.get("bad"), None);
        assert!(!dir.path().join("bad.json").exists());
    }

    #[test]
    fn overwrite_replaces_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.put("key", "first", 300).unwrap();
        store.put("key", "second", 300).unwrap();
        assert_eq!(store.get("key").as_deref(), Some("second"));
    }

    #[test]
    fn read_only_store_skips_writes_and_deletions() {
        let dir = tempfile::tempdir().unwrap();
        let writer = store(dir.path());
        writer.put("key", "value", 0).unwrap();

        let reader = DataStore::new(dir.path(), Duration::from_secs(1), true);
        assert_eq!(reader.get("key"), None);
        // The expired item is still on disk: read-only mode never unlinks.
        assert!(dir.path().join("key.json").exists());

        reader.put("other", "value", 300).unwrap();
        assert!(!dir.path().join("other.json").exists());
    }

    #[test]
    fn sweep_removes_only_expired_items() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.put("fresh", "value", 300).unwrap();
        store.put("stale", "value", 0).unwrap();

        let removed = store.sweep().unwrap();
        assert_eq!(removed, 1);
        assert!(dir.path().join("fresh.json").exists());
        assert!(!dir.path().join("stale.json").exists());
    }
}
