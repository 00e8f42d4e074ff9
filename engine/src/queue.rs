//! Queue manager - the enqueue/dequeue/status API.
//!
//! The manager owns its [`QueueStore`] and runs every operation as a
//! read-modify-write cycle against the persisted queue while holding an
//! internal lock, so one instance can be shared across threads behind an
//! `Arc`.
//!
//! # Dedup rules
//!
//! When an action is queued while an older **pending** item targets the same
//! record:
//!
//! 1. `add_favorite` / `remove_favorite` pairs cancel out: the older item is
//!    removed and the new one is not added.
//! 2. A second `update_reflection` overwrites the older one's payload and
//!    timestamp in place.
//!
//! Items already `processing` or `failed` are never cancelled or coalesced.

use crate::{
    error::Result, ActionKind, Clock, ConflictResolution, ItemStatus, KeyValueStorage,
    QueueAction, QueueConfig, QueueItem, QueueStore, StorageError, SystemClock,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What `enqueue` did with an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "item", rename_all = "lowercase")]
pub enum Enqueued {
    /// Appended as a new item
    Added(QueueItem),
    /// Folded into an older pending edit of the same reflection
    Coalesced(QueueItem),
    /// Cancelled an older pending opposite action; holds the removed item
    Cancelled(QueueItem),
}

impl Enqueued {
    /// The item that was added, updated, or removed.
    pub fn item(&self) -> &QueueItem {
        match self {
            Enqueued::Added(item) | Enqueued::Coalesced(item) | Enqueued::Cancelled(item) => item,
        }
    }

    pub fn into_item(self) -> QueueItem {
        match self {
            Enqueued::Added(item) | Enqueued::Coalesced(item) | Enqueued::Cancelled(item) => item,
        }
    }

    /// Whether the queue now holds an item for this action.
    pub fn is_queued(&self) -> bool {
        !matches!(self, Enqueued::Cancelled(_))
    }
}

/// Item counts by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    /// Failed items at or over the configured retry ceiling
    pub exhausted: usize,
}

impl QueueCounts {
    /// Unsent work: pending plus failed.
    pub fn outstanding(&self) -> usize {
        self.pending + self.failed
    }
}

/// The offline mutation queue.
pub struct QueueManager<S> {
    store: Mutex<QueueStore<S>>,
    clock: Box<dyn Clock>,
    config: QueueConfig,
}

impl<S: KeyValueStorage> QueueManager<S> {
    /// Create a manager persisting to `storage` under `config.storage_key`.
    pub fn new(storage: S, config: QueueConfig) -> Self {
        Self::with_clock(storage, config, SystemClock)
    }

    /// Create a manager stamping items with `clock`.
    pub fn with_clock(storage: S, config: QueueConfig, clock: impl Clock + 'static) -> Self {
        Self {
            store: Mutex::new(QueueStore::new(storage, config.storage_key.clone())),
            clock: Box::new(clock),
            config,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------

    /// Queue an action with the default `local_wins` policy.
    pub fn enqueue(&self, action: QueueAction) -> Enqueued {
        self.enqueue_with(action, ConflictResolution::default())
    }

    /// Queue an action.
    pub fn enqueue_with(&self, action: QueueAction, resolution: ConflictResolution) -> Enqueued {
        let now = self.clock.now();
        self.mutate(|queue| {
            let outcome = apply_enqueue(queue, action, resolution, now);
            match &outcome {
                Enqueued::Added(item) => {
                    tracing::debug!(item_id = %item.id, action = %item.action, "Queued action");
                }
                Enqueued::Coalesced(item) => {
                    tracing::info!(item_id = %item.id, action = %item.action, "Coalesced with pending edit");
                }
                Enqueued::Cancelled(item) => {
                    tracing::info!(item_id = %item.id, action = %item.action, "Cancelled pending opposite action");
                }
            }
            (outcome, true)
        })
    }

    /// Queue an action given as a kind and an untyped payload.
    pub fn enqueue_raw(
        &self,
        kind: ActionKind,
        payload: Value,
        resolution: ConflictResolution,
    ) -> Result<Enqueued> {
        let action = QueueAction::from_parts(kind, payload)?;
        Ok(self.enqueue_with(action, resolution))
    }

    // ------------------------------------------------------------------
    // Driver bookkeeping
    // ------------------------------------------------------------------

    /// Remove an item. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.mutate(|queue| {
            let before = queue.len();
            queue.retain(|item| item.id != id);
            let removed = queue.len() != before;
            if removed {
                tracing::debug!(item_id = %id, "Removed queue item");
            }
            (removed, removed)
        })
    }

    /// Set an item's status, optionally counting a failed attempt.
    ///
    /// Unknown ids are ignored; returns whether an item matched.
    pub fn update_status(&self, id: &str, status: ItemStatus, increment_retry: bool) -> bool {
        self.mutate(|queue| match queue.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.status = status;
                if increment_retry {
                    item.retry_count = item.retry_count.saturating_add(1);
                }
                tracing::debug!(
                    item_id = %id,
                    status = ?status,
                    retry_count = item.retry_count,
                    "Updated queue item status"
                );
                (true, true)
            }
            None => {
                tracing::debug!(item_id = %id, "Status update for unknown item ignored");
                (false, false)
            }
        })
    }

    /// Mark an item as being replayed.
    pub fn mark_processing(&self, id: &str) -> bool {
        self.update_status(id, ItemStatus::Processing, false)
    }

    /// The backend accepted the item; drop it.
    pub fn mark_succeeded(&self, id: &str) -> bool {
        self.remove(id)
    }

    /// The backend rejected the item; record the failed attempt.
    pub fn mark_failed(&self, id: &str) -> bool {
        self.update_status(id, ItemStatus::Failed, true)
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    /// Put a failed item back to pending. Its retry count is kept.
    pub fn retry(&self, id: &str) -> bool {
        self.mutate(|queue| {
            match queue
                .iter_mut()
                .find(|item| item.id == id && item.status == ItemStatus::Failed)
            {
                Some(item) => {
                    item.status = ItemStatus::Pending;
                    (true, true)
                }
                None => (false, false),
            }
        })
    }

    /// Put every failed item back to pending. Returns how many moved.
    pub fn retry_failed(&self) -> usize {
        self.mutate(|queue| {
            let mut moved = 0;
            for item in queue.iter_mut().filter(|i| i.status == ItemStatus::Failed) {
                item.status = ItemStatus::Pending;
                moved += 1;
            }
            if moved > 0 {
                tracing::info!(count = moved, "Retrying failed queue items");
            }
            (moved, moved > 0)
        })
    }

    /// Drop every queued item, sent or not.
    pub fn clear(&self) {
        self.mutate(|queue| {
            tracing::info!(count = queue.len(), "Clearing offline queue");
            queue.clear();
            ((), true)
        })
    }

    /// Drop failed items whose retry count reached `max_retries`.
    /// Returns how many were removed.
    pub fn clear_exhausted(&self, max_retries: u32) -> usize {
        self.mutate(|queue| {
            let before = queue.len();
            queue.retain(|item| !item.is_exhausted(max_retries));
            let removed = before - queue.len();
            if removed > 0 {
                tracing::info!(count = removed, max_retries, "Purged exhausted queue items");
            }
            (removed, removed > 0)
        })
    }

    /// [`clear_exhausted`](Self::clear_exhausted) with the configured ceiling.
    pub fn purge_exhausted(&self) -> usize {
        self.clear_exhausted(self.config.max_retries)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Every item, oldest first.
    pub fn items(&self) -> Vec<QueueItem> {
        self.lock().load()
    }

    /// Look up an item by id.
    pub fn get(&self, id: &str) -> Option<QueueItem> {
        self.items().into_iter().find(|item| item.id == id)
    }

    /// Items awaiting replay: pending, or failed with retries left. Oldest first.
    pub fn replayable(&self) -> Vec<QueueItem> {
        let max_retries = self.config.max_retries;
        self.items()
            .into_iter()
            .filter(|item| item.is_replayable(max_retries))
            .collect()
    }

    /// Count of pending plus failed items.
    pub fn pending_count(&self) -> usize {
        self.items()
            .iter()
            .filter(|item| item.status.is_outstanding())
            .count()
    }

    /// Items of one kind, in any status.
    pub fn items_by_type(&self, kind: ActionKind) -> Vec<QueueItem> {
        self.items()
            .into_iter()
            .filter(|item| item.kind() == kind)
            .collect()
    }

    /// Whether an item of `kind` targets `identifier` (verse id for
    /// favorites, reflection id for reflections).
    pub fn contains(&self, kind: ActionKind, identifier: &str) -> bool {
        self.items()
            .iter()
            .any(|item| item.kind() == kind && item.action.targets(identifier))
    }

    /// Counts by status.
    pub fn counts(&self) -> QueueCounts {
        let max_retries = self.config.max_retries;
        self.items()
            .iter()
            .fold(QueueCounts::default(), |mut counts, item| {
                match item.status {
                    ItemStatus::Pending => counts.pending += 1,
                    ItemStatus::Processing => counts.processing += 1,
                    ItemStatus::Failed => counts.failed += 1,
                }
                if item.is_exhausted(max_retries) {
                    counts.exhausted += 1;
                }
                counts
            })
    }

    // ------------------------------------------------------------------
    // Persistence health
    // ------------------------------------------------------------------

    /// The last write failure, if the queue in memory is ahead of storage.
    pub fn last_persist_error(&self) -> Option<StorageError> {
        self.lock().last_error().cloned()
    }

    /// Whether changes are waiting to be written.
    pub fn has_unsaved_changes(&self) -> bool {
        self.lock().has_unsaved()
    }

    /// Retry writing changes held in memory after a failed write.
    pub fn flush(&self) -> Result<()> {
        self.lock().flush()
    }

    fn lock(&self) -> MutexGuard<'_, QueueStore<S>> {
        // The queue is reloaded on every cycle, so a panic mid-cycle leaves
        // nothing half-applied behind the lock.
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load, apply `f`, and persist if `f` reports a change.
    fn mutate<T>(&self, f: impl FnOnce(&mut Vec<QueueItem>) -> (T, bool)) -> T {
        let mut store = self.lock();
        let mut queue = store.load();
        let (result, changed) = f(&mut queue);
        if changed {
            // A failed write is logged and held by the store; the next write retries it.
            let _ = store.save(queue);
        }
        result
    }
}

/// Apply the dedup rules and insert if nothing cancelled or coalesced.
fn apply_enqueue(
    queue: &mut Vec<QueueItem>,
    action: QueueAction,
    resolution: ConflictResolution,
    now: DateTime<Utc>,
) -> Enqueued {
    let kind = action.kind();
    let target = action.target();
    let pending_on_target = |item: &QueueItem, wanted: ActionKind| {
        item.status == ItemStatus::Pending && item.kind() == wanted && item.target() == target
    };

    if let Some(opposite) = kind.opposite() {
        if let Some(index) = queue.iter().position(|i| pending_on_target(i, opposite)) {
            return Enqueued::Cancelled(queue.remove(index));
        }
    }

    if kind == ActionKind::UpdateReflection {
        if let Some(item) = queue
            .iter_mut()
            .find(|i| pending_on_target(i, ActionKind::UpdateReflection))
        {
            item.action = action;
            item.timestamp = now;
            return Enqueued::Coalesced(item.clone());
        }
    }

    let item = QueueItem::new(action, resolution, now);
    queue.push(item.clone());
    Enqueued::Added(item)
}
