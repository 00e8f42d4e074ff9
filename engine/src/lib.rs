//! # Offline Queue
//!
//! A durable queue of user mutations for local-first clients.
//!
//! While a device is offline, every user-visible change (favoriting a verse,
//! writing or editing a reflection) is recorded here instead of being sent.
//! When connectivity returns, a sync driver replays the queue in order and
//! reports back which items succeeded or failed. The queue survives process
//! restarts because every change is written through to a key-value store.
//!
//! ## Core Concepts
//!
//! ### Actions and items
//!
//! A [`QueueAction`] is one user mutation with its typed payload. Queuing it
//! wraps it in a [`QueueItem`] with an id, a timestamp, a status
//! ([`ItemStatus`]) and a retry count.
//!
//! ### Dedup on enqueue
//!
//! The [`QueueManager`] keeps the queue minimal while items wait:
//! - a favorite followed by an un-favorite of the same verse cancels out
//! - repeated edits of one reflection collapse into a single pending edit
//!
//! ### Storage
//!
//! The queue is persisted as one JSON array under one key of a
//! [`KeyValueStorage`]. [`MemoryStorage`] and [`FileStorage`] are provided;
//! hosts embedding the C ABI supply callbacks instead.
//!
//! ### Conflict resolution
//!
//! When the server already holds a different version of a record, the
//! driver calls [`resolve`] with a [`MergeStrategy`]. Resolution is a pure
//! function of its inputs.
//!
//! ## Quick Start
//!
//! ```rust
//! use offline_queue::{
//!     Enqueued, MemoryStorage, QueueAction, QueueConfig, QueueManager,
//! };
//!
//! // 1. Create a queue
//! let queue = QueueManager::new(MemoryStorage::new(), QueueConfig::default());
//!
//! // 2. Record user actions while offline
//! queue.enqueue(QueueAction::add_favorite("John-3-16"));
//! queue.enqueue(QueueAction::update_reflection("r1", "first draft"));
//! queue.enqueue(QueueAction::update_reflection("r1", "second draft"));
//! assert_eq!(queue.pending_count(), 2);
//!
//! // Un-favoriting before the favorite was sent cancels both
//! let outcome = queue.enqueue(QueueAction::remove_favorite("John-3-16"));
//! assert!(matches!(outcome, Enqueued::Cancelled(_)));
//! assert_eq!(queue.pending_count(), 1);
//!
//! // 3. Replay when back online
//! for item in queue.replayable() {
//!     queue.mark_processing(&item.id);
//!     // ... send item.payload() to the backend ...
//!     queue.mark_succeeded(&item.id);
//! }
//! assert_eq!(queue.pending_count(), 0);
//! ```
//!
//! ## FFI
//!
//! The [`ffi`] module provides C-compatible functions for use from other languages
//! (Dart/Flutter, Swift, Kotlin, etc.). All data is exchanged as JSON strings.
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events under the `offline_queue` target.
//! [`init_logging`] installs a subscriber for hosts that have none.

pub mod action;
pub mod clock;
pub mod config;
pub mod error;
pub mod ffi;
pub mod item;
pub mod logging;
pub mod queue;
pub mod reconcile;
pub mod storage;
pub mod store;

// Re-export main types at crate root
pub use action::{ActionKind, FavoritePayload, QueueAction, ReflectionPayload, Target};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, QueueConfig};
pub use error::{Error, StorageError};
pub use item::{ConflictResolution, ItemStatus, QueueItem};
pub use logging::init_logging;
pub use queue::{Enqueued, QueueCounts, QueueManager};
pub use reconcile::{
    deep_merge, resolve, resolve_detailed, resolve_typed, MergeStrategy, Outcome, Resolved,
};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
pub use store::QueueStore;

/// Queue item identifier (a UUID v4 string)
pub type ItemId = String;
