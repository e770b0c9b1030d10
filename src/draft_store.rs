// TTL-bound persistence for in-progress multi-step forms.
// Drafts older than the TTL are treated as gone so a stale, possibly mispriced form is never resumed.

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::{duration_to_millis, Clock};
use crate::config::DraftConfig;
use crate::storage::{KvStore, Snapshot, StorageError};

#[derive(Error, Debug)]
pub enum DraftError {
    #[error("Failed to serialize draft {key}: {message}")]
    SerializeError { key: String, message: String },

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

/// A draft as it was read back, with its lifetime bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftSession<T> {
    pub owner_key: String,
    pub payload: T,
    pub created_at: i64,
    pub expires_at: i64,
}

// Only the timestamp is decoded; the payload is skipped
#[derive(Deserialize)]
struct DraftHeader {
    #[allow(dead_code)]
    data: IgnoredAny,
    timestamp: i64,
}

pub struct DraftStore {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    key_prefix: String,
}

impl DraftStore {
    pub fn new(config: &DraftConfig, store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl: config.ttl(),
            key_prefix: config.key_prefix.clone(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn is_expired(&self, created_at: i64) -> bool {
        let age_ms = self.clock.now_millis().saturating_sub(created_at);
        age_ms > duration_to_millis(self.ttl)
    }

    // Removal failures are logged; the caller already treats the record as absent
    fn discard(&self, storage_key: &str) {
        if let Err(e) = self.store.delete(storage_key) {
            warn!(key = storage_key, error = %e, "failed to delete draft record");
        }
    }

    pub fn save<T: Serialize>(&self, key: &str, payload: &T) -> Result<(), DraftError> {
        let storage_key = self.storage_key(key);
        let snapshot = Snapshot {
            data: payload,
            timestamp: self.clock.now_millis(),
        };
        let json = serde_json::to_string(&snapshot).map_err(|e| DraftError::SerializeError {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.store.set(&storage_key, json)?;
        debug!(key = %storage_key, "draft saved");
        Ok(())
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.load_session(key).map(|session| session.payload)
    }

    /// Reads a draft with its timestamps. Expired and unreadable records are deleted.
    pub fn load_session<T: DeserializeOwned>(&self, key: &str) -> Option<DraftSession<T>> {
        let storage_key = self.storage_key(key);
        let raw = self.store.get(&storage_key)?;

        let snapshot: Snapshot<T> = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "discarding corrupt draft");
                self.discard(&storage_key);
                return None;
            }
        };

        if self.is_expired(snapshot.timestamp) {
            debug!(key = %storage_key, created_at = snapshot.timestamp, "draft expired");
            self.discard(&storage_key);
            return None;
        }

        Some(DraftSession {
            owner_key: key.to_string(),
            payload: snapshot.data,
            created_at: snapshot.timestamp,
            expires_at: snapshot
                .timestamp
                .saturating_add(duration_to_millis(self.ttl)),
        })
    }

    /// Cheap check used to offer a "resume" prompt.
    pub fn exists(&self, key: &str) -> bool {
        let storage_key = self.storage_key(key);
        let Some(raw) = self.store.get(&storage_key) else {
            return false;
        };

        match serde_json::from_str::<DraftHeader>(&raw) {
            Ok(header) if !self.is_expired(header.timestamp) => true,
            Ok(_) => {
                debug!(key = %storage_key, "draft expired");
                self.discard(&storage_key);
                false
            }
            Err(e) => {
                warn!(key = %storage_key, error = %e, "discarding corrupt draft");
                self.discard(&storage_key);
                false
            }
        }
    }

    pub fn clear(&self, key: &str) -> Result<(), DraftError> {
        self.store.delete(&self.storage_key(key))?;
        Ok(())
    }
}
