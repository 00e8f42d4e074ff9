//! Queue store - loads and persists the queue as one unit.
//!
//! The whole queue lives under a single storage key as a JSON array of
//! items, oldest first. Reading never fails: a missing, unreadable or corrupt
//! value is logged and treated as an empty queue.

use crate::{error::Result, Error, KeyValueStorage, QueueItem, StorageError};
use serde_json::Value;
use std::collections::HashSet;

/// Serialize a queue to its persisted form.
pub fn encode(items: &[QueueItem]) -> Result<Vec<u8>> {
    serde_json::to_vec(items).map_err(|e| Error::Serialization(e.to_string()))
}

/// Parse a persisted queue.
///
/// Never fails. A value that is not a JSON array yields an empty queue;
/// individual entries that do not decode are skipped; a repeated id keeps
/// its first occurrence.
pub fn decode(bytes: &[u8]) -> Vec<QueueItem> {
    let entries: Vec<Value> = match serde_json::from_slice(bytes) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, "Persisted queue is corrupt, starting from an empty queue");
            return Vec::new();
        }
    };

    let mut seen = HashSet::with_capacity(entries.len());
    let mut items = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<QueueItem>(entry) {
            Ok(item) if seen.insert(item.id.clone()) => items.push(item),
            Ok(item) => {
                tracing::warn!(item_id = %item.id, index, "Dropping queue item with duplicate id");
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping unreadable queue item");
            }
        }
    }
    items
}

/// Loads and saves the queue under one storage key.
#[derive(Debug)]
pub struct QueueStore<S> {
    storage: S,
    key: String,
    /// Latest queue whose write failed; served by `load` until a write lands.
    unsaved: Option<Vec<QueueItem>>,
    last_error: Option<StorageError>,
}

impl<S: KeyValueStorage> QueueStore<S> {
    /// Create a store persisting under `key`.
    pub fn new(storage: S, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            unsaved: None,
            last_error: None,
        }
    }

    /// The storage key this store owns.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The underlying storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Load the current queue.
    pub fn load(&self) -> Vec<QueueItem> {
        if let Some(items) = &self.unsaved {
            return items.clone();
        }

        match self.storage.read(&self.key) {
            Ok(Some(bytes)) => decode(&bytes),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "Failed to read queue, starting from an empty queue");
                Vec::new()
            }
        }
    }

    /// Persist the full queue.
    ///
    /// On failure the queue is kept in memory so later loads still see it and
    /// the next save writes it out again.
    pub fn save(&mut self, items: Vec<QueueItem>) -> Result<()> {
        let bytes = match encode(&items) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.unsaved = Some(items);
                return Err(e);
            }
        };

        match self.storage.write(&self.key, &bytes) {
            Ok(()) => {
                self.unsaved = None;
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    key = %self.key,
                    error = %e,
                    items = items.len(),
                    "Failed to persist queue; changes are held in memory until the next write"
                );
                self.unsaved = Some(items);
                self.last_error = Some(e.clone());
                Err(e.into())
            }
        }
    }

    /// Retry writing a queue whose last save failed. No-op otherwise.
    pub fn flush(&mut self) -> Result<()> {
        match self.unsaved.take() {
            Some(items) => self.save(items),
            None => Ok(()),
        }
    }

    /// Whether the in-memory queue is ahead of storage.
    pub fn has_unsaved(&self) -> bool {
        self.unsaved.is_some()
    }

    /// The error from the most recent failed write, cleared by a good one.
    pub fn last_error(&self) -> Option<&StorageError> {
        self.last_error.as_ref()
    }
}
