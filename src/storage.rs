// Key-value persistence used by the rate cache and the draft store.
// Values are opaque strings (JSON snapshots); backends know nothing about their shape.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage quota exceeded ({used} + {requested} > {limit} bytes)")]
    QuotaExceeded {
        used: usize,
        requested: usize,
        limit: usize,
    },
}

/// Persisted record layout shared by every snapshot writer: `{"data": ..., "timestamp": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub data: T,
    pub timestamp: i64,
}

// Storage backend trait. Reads never fail: an unreadable value is reported as absent.
pub trait KvStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    // Removing a missing key is not an error
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store with an optional byte quota, mirroring browser storage limits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn used_bytes_excluding(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.key() != key)
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        if let Some(limit) = self.quota_bytes {
            let used = self.used_bytes_excluding(key);
            let requested = key.len() + value.len();
            if used + requested > limit {
                return Err(StorageError::QuotaExceeded {
                    used,
                    requested,
                    limit,
                });
            }
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Keys like "draft:booking-1" become "draft%3Abooking-1.json".
    // Every byte outside [A-Za-z0-9-] is escaped, so distinct keys never share a file.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains("..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let mut file_name = String::with_capacity(key.len());
        for byte in key.bytes() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => file_name.push(byte as char),
                _ => file_name.push_str(&format!("%{:02X}", byte)),
            }
        }
        Ok(self.root.join(format!("{}.json", file_name)))
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for(key).ok()?;
        match fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    debug!(key, error = %e, "unreadable storage file treated as absent");
                }
                None
            }
        }
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        // Write-then-rename so a crash never leaves a half-written record
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value.as_bytes())
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|source| StorageError::Io {
                key: key.to_string(),
                source,
            })
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_set_get_delete() {
        let store = MemoryStore::new();
        assert!(store.get("a").is_none());

        store.set("a", "1".to_string()).unwrap();
        assert_eq!(store.get("a").as_deref(), Some("1"));

        store.set("a", "2".to_string()).unwrap();
        assert_eq!(store.get("a").as_deref(), Some("2"));
        assert_eq!(store.len(), 1);

        store.delete("a").unwrap();
        assert!(store.get("a").is_none());
        // Deleting again is fine
        store.delete("a").unwrap();
    }

    #[test]
    fn test_memory_store_quota() {
        let store = MemoryStore::with_quota(10);
        store.set("k", "12345".to_string()).unwrap();

        // Overwriting the same key does not count its old value
        store.set("k", "123456789".to_string()).unwrap();

        let err = store.set("other", "123".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { limit: 10, .. }));
        assert!(store.get("other").is_none());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("kv")).unwrap();

        assert!(store.get("draft:booking-1").is_none());
        store
            .set("draft:booking-1", r#"{"data":1,"timestamp":2}"#.to_string())
            .unwrap();
        assert_eq!(
            store.get("draft:booking-1").as_deref(),
            Some(r#"{"data":1,"timestamp":2}"#)
        );
        assert!(store.root().join("draft%3Abooking-1.json").exists());

        store.delete("draft:booking-1").unwrap();
        assert!(store.get("draft:booking-1").is_none());
        store.delete("draft:booking-1").unwrap();
    }

    #[test]
    fn test_file_store_keeps_similar_keys_apart() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("draft:trip:1", "A".to_string()).unwrap();
        store.set("draft:trip_1", "B".to_string()).unwrap();
        store.set("draft:trip.1", "C".to_string()).unwrap();
        assert_eq!(store.get("draft:trip:1").as_deref(), Some("A"));
        assert_eq!(store.get("draft:trip_1").as_deref(), Some("B"));
        assert_eq!(store.get("draft:trip.1").as_deref(), Some("C"));

        store.delete("draft:trip_1").unwrap();
        assert_eq!(store.get("draft:trip:1").as_deref(), Some("A"));
        assert!(store.get("draft:trip_1").is_none());
        assert_eq!(store.get("draft:trip.1").as_deref(), Some("C"));
    }

    #[test]
    fn test_file_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.set("../escape", "x".to_string()),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(store.get("").is_none());
    }

    #[test]
    fn test_snapshot_json_layout() {
        let snapshot = Snapshot {
            data: vec![1, 2],
            timestamp: 99,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"data":[1,2],"timestamp":99}"#);
    }
}
