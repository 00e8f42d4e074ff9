//! C ABI for embedding the queue in a host application.
//!
//! All data crosses the boundary as JSON strings. The host supplies the
//! durable storage as a set of callbacks; the queue calls them synchronously
//! from whichever thread invoked an `oq_*` function.
//!
//! # Memory Management
//!
//! - Strings returned by `oq_*` functions are allocated by Rust
//! - Caller must free them with `oq_string_free`
//! - Queue pointers must be freed with `oq_queue_free`
//! - Strings returned by the host's `read` callback are handed back to its
//!   `release` callback once copied
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure

use crate::{
    reconcile::{resolve_detailed, MergeStrategy},
    ActionKind, ConflictResolution, ItemStatus, KeyValueStorage, QueueConfig, QueueManager,
    StorageError,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr;

/// Read callback: returns a NUL-terminated value for `key`, or null if absent.
pub type OqReadFn = unsafe extern "C" fn(context: *mut c_void, key: *const c_char) -> *mut c_char;

/// Write callback: stores `value` under `key`, returns `false` on failure.
pub type OqWriteFn =
    unsafe extern "C" fn(context: *mut c_void, key: *const c_char, value: *const c_char) -> bool;

/// Release callback: frees a string previously returned by the read callback.
pub type OqReleaseFn = unsafe extern "C" fn(context: *mut c_void, value: *mut c_char);

/// Host storage callbacks.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OqStorage {
    /// Opaque pointer passed back to every callback
    pub context: *mut c_void,
    pub read: Option<OqReadFn>,
    pub write: Option<OqWriteFn>,
    /// Optional; without it strings returned by `read` are not freed
    pub release: Option<OqReleaseFn>,
}

/// [`KeyValueStorage`] backed by host callbacks.
#[derive(Debug)]
pub struct CallbackStorage {
    callbacks: OqStorage,
}

// The host promises its callbacks and context may be used from any thread
// that calls into the queue.
unsafe impl Send for CallbackStorage {}

impl CallbackStorage {
    /// # Safety
    /// The callbacks and context in `callbacks` must stay valid for the
    /// lifetime of the storage.
    pub unsafe fn new(callbacks: OqStorage) -> Self {
        Self { callbacks }
    }
}

fn c_key(key: &str) -> Result<CString, StorageError> {
    CString::new(key).map_err(|_| StorageError::Backend(format!("key contains NUL: {key:?}")))
}

impl KeyValueStorage for CallbackStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let read = self
            .callbacks
            .read
            .ok_or_else(|| StorageError::Backend("no read callback".into()))?;
        let c_key = c_key(key)?;

        unsafe {
            let value = read(self.callbacks.context, c_key.as_ptr());
            if value.is_null() {
                return Ok(None);
            }
            let bytes = CStr::from_ptr(value).to_bytes().to_vec();
            if let Some(release) = self.callbacks.release {
                release(self.callbacks.context, value);
            }
            Ok(Some(bytes))
        }
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let write = self
            .callbacks
            .write
            .ok_or_else(|| StorageError::Backend("no write callback".into()))?;
        let c_key = c_key(key)?;
        let c_value = CString::new(value)
            .map_err(|_| StorageError::Backend("value contains NUL".into()))?;

        let stored = unsafe { write(self.callbacks.context, c_key.as_ptr(), c_value.as_ptr()) };
        if stored {
            Ok(())
        } else {
            Err(StorageError::Backend(format!("host write failed for {key}")))
        }
    }
}

/// Queue handle handed to the host.
pub type FfiQueue = QueueManager<CallbackStorage>;

/// Result wrapper for FFI responses.
#[derive(serde::Serialize)]
#[serde(untagged)]
enum FfiResult<T: serde::Serialize> {
    Ok { ok: T },
    Err { error: String },
}

impl<T: serde::Serialize> FfiResult<T> {
    fn ok(value: T) -> Self {
        FfiResult::Ok { ok: value }
    }

    fn err(message: impl Into<String>) -> Self {
        FfiResult::Err {
            error: message.into(),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e))
    }

    fn into_c_string(self) -> *mut c_char {
        to_c_string(self.to_json())
    }
}

fn error_json(message: impl Into<String>) -> *mut c_char {
    FfiResult::<()>::err(message).into_c_string()
}

/// Convert a Rust string to a C string pointer.
/// Caller must free with `oq_string_free`.
fn to_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => CString::from(c"{\"error\":\"string contained null bytes\"}").into_raw(),
    }
}

/// Convert a C string pointer to a Rust string.
/// Returns None if pointer is null or invalid UTF-8.
unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Parse a snake_case enum name such as `"local_wins"` or `"failed"`.
fn parse_name<T: DeserializeOwned>(name: &str, what: &str) -> Result<T, String> {
    serde_json::from_value(Value::String(name.to_string()))
        .map_err(|_| format!("Unknown {what}: {name}"))
}

/// Parse an optional enum argument, falling back to its default when null.
unsafe fn optional_name<T: DeserializeOwned + Default>(
    ptr: *const c_char,
    what: &str,
) -> Result<T, String> {
    if ptr.is_null() {
        return Ok(T::default());
    }
    match from_c_string(ptr) {
        Some(name) => parse_name(&name, what),
        None => Err(format!("Invalid {what} string")),
    }
}

unsafe fn action_kind(ptr: *const c_char) -> Result<ActionKind, String> {
    let name = from_c_string(ptr).ok_or("Invalid action type string")?;
    name.parse().map_err(|e: crate::Error| e.to_string())
}

// ============================================================================
// Queue Lifecycle
// ============================================================================

/// Create a queue.
///
/// # Arguments
/// - `config_json`: JSON `QueueConfig` (`{"storageKey", "maxRetries"}`), or
///   null for defaults
/// - `storage`: host storage callbacks
///
/// # Returns
/// Pointer to the queue, or null on failure.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string or null
/// - The callbacks and context in `storage` must outlive the queue
/// - Caller must free the returned pointer with `oq_queue_free`
#[no_mangle]
pub unsafe extern "C" fn oq_queue_new(
    config_json: *const c_char,
    storage: OqStorage,
) -> *mut FfiQueue {
    let config = if config_json.is_null() {
        QueueConfig::default()
    } else {
        let config_str = match from_c_string(config_json) {
            Some(s) => s,
            None => return ptr::null_mut(),
        };
        match serde_json::from_str::<QueueConfig>(&config_str) {
            Ok(c) if !c.storage_key.trim().is_empty() => c,
            _ => return ptr::null_mut(),
        }
    };

    if storage.read.is_none() || storage.write.is_none() {
        return ptr::null_mut();
    }

    let queue = QueueManager::new(CallbackStorage::new(storage), config);
    Box::into_raw(Box::new(queue))
}

/// Free a queue.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn oq_queue_free(queue: *mut FfiQueue) {
    if !queue.is_null() {
        drop(Box::from_raw(queue));
    }
}

/// Free a string returned by any `oq_*` function.
///
/// # Safety
/// - `s` must be a valid pointer from an `oq_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn oq_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// Enqueue
// ============================================================================

/// Queue an action.
///
/// # Arguments
/// - `action_type`: e.g. `"add_favorite"`
/// - `payload_json`: JSON object payload for that type
/// - `resolution`: `"local_wins"`, `"remote_wins"`, `"merge"`, or null for
///   `local_wins`
///
/// # Returns
/// `{"ok": {"outcome": "added"|"coalesced"|"cancelled", "item": {...}}}`.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - String arguments must be valid null-terminated C strings (`resolution`
///   may be null)
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_enqueue(
    queue: *const FfiQueue,
    action_type: *const c_char,
    payload_json: *const c_char,
    resolution: *const c_char,
) -> *mut c_char {
    let queue = match queue.as_ref() {
        Some(q) => q,
        None => return error_json("null queue pointer"),
    };

    let kind = match action_kind(action_type) {
        Ok(k) => k,
        Err(e) => return error_json(e),
    };

    let payload_str = match from_c_string(payload_json) {
        Some(s) => s,
        None => return error_json("Invalid payload string"),
    };

    let payload: Value = match serde_json::from_str(&payload_str) {
        Ok(v) => v,
        Err(e) => return error_json(format!("Invalid payload JSON: {}", e)),
    };

    let resolution: ConflictResolution = match optional_name(resolution, "conflict resolution") {
        Ok(r) => r,
        Err(e) => return error_json(e),
    };

    match queue.enqueue_raw(kind, payload, resolution) {
        Ok(outcome) => FfiResult::ok(outcome).into_c_string(),
        Err(e) => error_json(e.to_string()),
    }
}

// ============================================================================
// Driver Bookkeeping
// ============================================================================

/// Remove an item by id.
///
/// # Returns
/// `{"ok": true}` if the item was present, `{"ok": false}` otherwise.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - `id` must be a valid null-terminated C string
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_remove(queue: *const FfiQueue, id: *const c_char) -> *mut c_char {
    let queue = match queue.as_ref() {
        Some(q) => q,
        None => return error_json("null queue pointer"),
    };

    match from_c_string(id) {
        Some(id) => FfiResult::ok(queue.remove(&id)).into_c_string(),
        None => error_json("Invalid id string"),
    }
}

/// Set an item's status, optionally counting a failed attempt.
///
/// # Arguments
/// - `status`: `"pending"`, `"processing"` or `"failed"`
///
/// # Returns
/// `{"ok": true}` if an item matched, `{"ok": false}` otherwise.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - `id` and `status` must be valid null-terminated C strings
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_update_status(
    queue: *const FfiQueue,
    id: *const c_char,
    status: *const c_char,
    increment_retry: bool,
) -> *mut c_char {
    let queue = match queue.as_ref() {
        Some(q) => q,
        None => return error_json("null queue pointer"),
    };

    let id = match from_c_string(id) {
        Some(s) => s,
        None => return error_json("Invalid id string"),
    };

    let status: ItemStatus = match from_c_string(status) {
        Some(name) => match parse_name(&name, "status") {
            Ok(s) => s,
            Err(e) => return error_json(e),
        },
        None => return error_json("Invalid status string"),
    };

    FfiResult::ok(queue.update_status(&id, status, increment_retry)).into_c_string()
}

/// Put every failed item back to pending.
///
/// # Returns
/// `{"ok": <number moved>}`.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_retry_failed(queue: *const FfiQueue) -> *mut c_char {
    match queue.as_ref() {
        Some(q) => FfiResult::ok(q.retry_failed()).into_c_string(),
        None => error_json("null queue pointer"),
    }
}

/// Drop every queued item.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_clear(queue: *const FfiQueue) -> *mut c_char {
    match queue.as_ref() {
        Some(q) => {
            q.clear();
            FfiResult::ok(()).into_c_string()
        }
        None => error_json("null queue pointer"),
    }
}

/// Drop failed items whose retry count reached `max_retries`.
///
/// # Returns
/// `{"ok": <number removed>}`.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_clear_exhausted(
    queue: *const FfiQueue,
    max_retries: u32,
) -> *mut c_char {
    match queue.as_ref() {
        Some(q) => FfiResult::ok(q.clear_exhausted(max_retries)).into_c_string(),
        None => error_json("null queue pointer"),
    }
}

/// Retry writing the queue after a failed write.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_flush(queue: *const FfiQueue) -> *mut c_char {
    match queue.as_ref() {
        Some(q) => match q.flush() {
            Ok(()) => FfiResult::ok(()).into_c_string(),
            Err(e) => error_json(e.to_string()),
        },
        None => error_json("null queue pointer"),
    }
}

/// The most recent storage write failure.
///
/// # Returns
/// `{"ok": null}` when the last write succeeded, `{"ok": "<message>"}`
/// otherwise.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_last_persist_error(queue: *const FfiQueue) -> *mut c_char {
    match queue.as_ref() {
        Some(q) => {
            FfiResult::ok(q.last_persist_error().map(|e| e.to_string())).into_c_string()
        }
        None => error_json("null queue pointer"),
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Count of pending plus failed items.
///
/// # Returns
/// The count, or -1 if `queue` is null.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new` or null
#[no_mangle]
pub unsafe extern "C" fn oq_pending_count(queue: *const FfiQueue) -> i64 {
    match queue.as_ref() {
        Some(q) => q.pending_count() as i64,
        None => -1,
    }
}

/// Every item, oldest first.
///
/// # Returns
/// `{"ok": [<item>, ...]}`.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_items(queue: *const FfiQueue) -> *mut c_char {
    match queue.as_ref() {
        Some(q) => FfiResult::ok(q.items()).into_c_string(),
        None => error_json("null queue pointer"),
    }
}

/// Items of one action type, in any status.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - `action_type` must be a valid null-terminated C string
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_items_by_type(
    queue: *const FfiQueue,
    action_type: *const c_char,
) -> *mut c_char {
    let queue = match queue.as_ref() {
        Some(q) => q,
        None => return error_json("null queue pointer"),
    };

    match action_kind(action_type) {
        Ok(kind) => FfiResult::ok(queue.items_by_type(kind)).into_c_string(),
        Err(e) => error_json(e),
    }
}

/// Whether an item of `action_type` targets `identifier`.
///
/// # Returns
/// `{"ok": true|false}`.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - `action_type` and `identifier` must be valid null-terminated C strings
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_contains(
    queue: *const FfiQueue,
    action_type: *const c_char,
    identifier: *const c_char,
) -> *mut c_char {
    let queue = match queue.as_ref() {
        Some(q) => q,
        None => return error_json("null queue pointer"),
    };

    let kind = match action_kind(action_type) {
        Ok(k) => k,
        Err(e) => return error_json(e),
    };

    match from_c_string(identifier) {
        Some(identifier) => FfiResult::ok(queue.contains(kind, &identifier)).into_c_string(),
        None => error_json("Invalid identifier string"),
    }
}

/// Items awaiting replay, oldest first.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_replayable(queue: *const FfiQueue) -> *mut c_char {
    match queue.as_ref() {
        Some(q) => FfiResult::ok(q.replayable()).into_c_string(),
        None => error_json("null queue pointer"),
    }
}

/// Item counts by status.
///
/// # Returns
/// `{"ok": {"pending", "processing", "failed", "exhausted"}}`.
///
/// # Safety
/// - `queue` must be a valid pointer from `oq_queue_new`
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_counts(queue: *const FfiQueue) -> *mut c_char {
    match queue.as_ref() {
        Some(q) => FfiResult::ok(q.counts()).into_c_string(),
        None => error_json("null queue pointer"),
    }
}

// ============================================================================
// Conflict Resolution
// ============================================================================

/// Resolve a local record against the server's copy.
///
/// # Arguments
/// - `strategy`: `"local_wins"`, `"remote_wins"`, `"merge"`, `"newest_wins"`,
///   or null for `newest_wins`
///
/// # Returns
/// `{"ok": {"record": <value>, "outcome": "local"|"remote"|"merged"}}`.
///
/// # Safety
/// - `local_json` and `remote_json` must be valid null-terminated C strings
/// - `strategy` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `oq_string_free`
#[no_mangle]
pub unsafe extern "C" fn oq_resolve(
    local_json: *const c_char,
    remote_json: *const c_char,
    strategy: *const c_char,
) -> *mut c_char {
    let local: Value = match from_c_string(local_json).map(|s| serde_json::from_str(&s)) {
        Some(Ok(v)) => v,
        Some(Err(e)) => return error_json(format!("Invalid local JSON: {}", e)),
        None => return error_json("Invalid local string"),
    };

    let remote: Value = match from_c_string(remote_json).map(|s| serde_json::from_str(&s)) {
        Some(Ok(v)) => v,
        Some(Err(e)) => return error_json(format!("Invalid remote JSON: {}", e)),
        None => return error_json("Invalid remote string"),
    };

    let strategy: MergeStrategy = match optional_name(strategy, "merge strategy") {
        Ok(s) => s,
        Err(e) => return error_json(e),
    };

    FfiResult::ok(resolve_detailed(&local, &remote, strategy)).into_c_string()
}

// ============================================================================
// Utilities
// ============================================================================

/// Install a `tracing` subscriber writing to stderr.
///
/// `filter` takes `EnvFilter` directives, or null to use `RUST_LOG`.
/// Returns `false` if a subscriber is already installed or the directives
/// are invalid.
///
/// # Safety
/// - `filter` must be a valid null-terminated C string or null
#[no_mangle]
pub unsafe extern "C" fn oq_init_logging(filter: *const c_char) -> bool {
    let filter = from_c_string(filter);
    crate::init_logging(filter.as_deref())
}

/// Get engine version.
///
/// # Returns
/// Static version string (do not free).
#[no_mangle]
pub extern "C" fn oq_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}
