//! Queue item types.

use crate::{
    reconcile::{self, MergeStrategy},
    ActionKind, Error, ItemId, QueueAction, Target,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Replay status of a queued item.
///
/// There is no "succeeded" state: a replayed item is removed from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting for the driver
    #[default]
    Pending,
    /// The driver has an attempt in flight (advisory only)
    Processing,
    /// The last attempt was rejected; still outstanding
    Failed,
}

impl ItemStatus {
    /// Whether the item still counts as unsent work.
    pub fn is_outstanding(self) -> bool {
        matches!(self, ItemStatus::Pending | ItemStatus::Failed)
    }
}

/// Policy chosen at enqueue time for a collision with a server-side change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the queued version (default)
    #[default]
    LocalWins,
    /// Keep the server version
    RemoteWins,
    /// Server version as base, queued version layered on top
    Merge,
}

/// One pending local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StoredItem", try_from = "StoredItem")]
pub struct QueueItem {
    /// Unique identifier, immutable once assigned
    pub id: ItemId,
    /// What to replay
    pub action: QueueAction,
    /// Creation time, refreshed when the payload is coalesced
    pub timestamp: DateTime<Utc>,
    /// Failed attempts reported by the driver
    pub retry_count: u32,
    /// Replay status
    pub status: ItemStatus,
    /// How to settle a collision with the server copy
    pub conflict_resolution: ConflictResolution,
}

impl QueueItem {
    /// Create a fresh pending item with a new random id.
    pub fn new(
        action: QueueAction,
        conflict_resolution: ConflictResolution,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action,
            timestamp,
            retry_count: 0,
            status: ItemStatus::Pending,
            conflict_resolution,
        }
    }

    /// Get the action kind.
    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    /// Get the record this item targets.
    pub fn target(&self) -> Target {
        self.action.target()
    }

    /// The payload as persisted.
    pub fn payload(&self) -> Value {
        self.action.payload()
    }

    /// Failed with no retry budget left under `max_retries`.
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.status == ItemStatus::Failed && self.retry_count >= max_retries
    }

    /// Something a driver should attempt next.
    pub fn is_replayable(&self, max_retries: u32) -> bool {
        match self.status {
            ItemStatus::Pending => true,
            ItemStatus::Failed => self.retry_count < max_retries,
            ItemStatus::Processing => false,
        }
    }

    /// Resolve this item's payload against the server's copy of the same
    /// record, using the policy chosen when the item was queued.
    pub fn resolve_against(&self, remote: &Value) -> Value {
        reconcile::resolve(
            &self.payload(),
            remote,
            MergeStrategy::from(self.conflict_resolution),
        )
    }
}

/// The persisted shape of a [`QueueItem`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredItem {
    id: ItemId,
    #[serde(rename = "type")]
    kind: ActionKind,
    payload: Value,
    #[serde(with = "iso8601")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    retry_count: u32,
    #[serde(default)]
    status: ItemStatus,
    #[serde(default)]
    conflict_resolution: ConflictResolution,
}

impl From<QueueItem> for StoredItem {
    fn from(item: QueueItem) -> Self {
        Self {
            kind: item.action.kind(),
            payload: item.action.payload(),
            id: item.id,
            timestamp: item.timestamp,
            retry_count: item.retry_count,
            status: item.status,
            conflict_resolution: item.conflict_resolution,
        }
    }
}

impl TryFrom<StoredItem> for QueueItem {
    type Error = Error;

    fn try_from(stored: StoredItem) -> Result<Self, Error> {
        if stored.id.is_empty() {
            return Err(Error::InvalidRecord("queue item without id".into()));
        }
        Ok(Self {
            action: QueueAction::from_parts(stored.kind, stored.payload)?,
            id: stored.id,
            timestamp: stored.timestamp,
            retry_count: stored.retry_count,
            status: stored.status,
            conflict_resolution: stored.conflict_resolution,
        })
    }
}

/// ISO-8601 timestamps with millisecond precision, always in UTC (`Z`).
mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
