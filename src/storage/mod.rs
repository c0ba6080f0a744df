//! Storage collaborator contracts.
//!
//! The proxy never interprets cache values: everything crossing this boundary
//! is opaque bytes in the connection's negotiated payload format. The traits
//! here are the seam between the protocol engines and whatever engine
//! actually holds the data; `memory` provides the default in-process
//! implementation used by the runtime and the test suites.

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod memory;
pub mod queue;

pub use memory::{MemoryBackend, MemoryCache};
pub use queue::MemoryQueue;

/// Failures surfaced by storage collaborators.
///
/// The proxy maps every variant to a single-request error frame; none of
/// these abort the connection.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource `{0}` has been destroyed")]
    Destroyed(String),
    #[error("incompatible queue kind for `{name}`: existing {existing}, requested {requested}")]
    IncompatibleKind {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },
    #[error("unsupported {what}: {detail}")]
    Unsupported { what: &'static str, detail: String },
    #[error("store call timed out")]
    Timeout,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Server-side entry filter vocabulary shared between the wire protocol and
/// the storage contract. Closed set: collaborators match on the variant,
/// never on downcast payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    /// Matches every entry.
    All,
    /// Matches entries whose key is one of the given keys.
    InKeySet { keys: Vec<Bytes> },
    /// Matches entries whose value equals the given bytes.
    ValueEquals { value: Bytes },
}

impl Filter {
    pub fn matches(&self, key: &[u8], value: &[u8]) -> bool {
        match self {
            Filter::All => true,
            Filter::InKeySet { keys } => keys.iter().any(|k| k.as_ref() == key),
            Filter::ValueEquals { value: expect } => expect.as_ref() == value,
        }
    }

    /// The finite key set for key-set filters, used to gate priming
    /// subscriptions.
    pub fn key_set(&self) -> Option<&[Bytes]> {
        match self {
            Filter::InKeySet { keys } => Some(keys),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Change notifications
// ---------------------------------------------------------------------------

/// One observed mutation on a named cache.
#[derive(Debug, Clone)]
pub struct EntryChange {
    pub key: Bytes,
    pub old_value: Option<Bytes>,
    pub new_value: Option<Bytes>,
    /// True when the change was not caused by a direct client mutation
    /// (expiry sweep, internal housekeeping).
    pub synthetic: bool,
    /// True when the entry was removed because its time-to-live elapsed.
    pub expired: bool,
    /// True when an installed trigger altered the written value in flight.
    pub transformed: bool,
}

/// Push notification emitted by a cache store to its watchers, in mutation
/// order.
#[derive(Debug, Clone)]
pub enum ChangeRecord {
    Entry(EntryChange),
    Truncated,
    Destroyed,
}

// ---------------------------------------------------------------------------
// Cache contract
// ---------------------------------------------------------------------------

/// Contract the proxy consumes for one named cache.
///
/// All keys and values are opaque bytes. Implementations must emit one
/// `ChangeRecord` per mutation to every live watcher, preserving per-key
/// mutation order.
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>>;
    fn get_all(&self, keys: &[Bytes]) -> StoreResult<Vec<(Bytes, Bytes)>>;
    fn put(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> StoreResult<Option<Bytes>>;
    fn put_all(&self, entries: Vec<(Bytes, Bytes)>, ttl: Option<Duration>) -> StoreResult<()>;
    fn put_if_absent(&self, key: Bytes, value: Bytes) -> StoreResult<Option<Bytes>>;
    fn remove(&self, key: &[u8]) -> StoreResult<Option<Bytes>>;
    fn remove_mapping(&self, key: &[u8], value: &[u8]) -> StoreResult<bool>;
    fn replace(&self, key: &[u8], value: Bytes) -> StoreResult<Option<Bytes>>;
    fn replace_mapping(&self, key: &[u8], expect: &[u8], value: Bytes) -> StoreResult<bool>;
    fn contains_key(&self, key: &[u8]) -> StoreResult<bool>;
    fn contains_value(&self, value: &[u8]) -> StoreResult<bool>;
    fn size(&self) -> StoreResult<usize>;
    fn clear(&self) -> StoreResult<()>;
    fn truncate(&self) -> StoreResult<()>;
    fn destroy(&self) -> StoreResult<()>;

    fn add_index(
        &self,
        extractor: Bytes,
        sorted: bool,
        comparator: Option<Bytes>,
    ) -> StoreResult<()>;
    /// Removing an index that was never added is a no-op success.
    fn remove_index(&self, extractor: &[u8]) -> StoreResult<()>;

    /// Matching entries; ordered by the comparator when one is supplied,
    /// otherwise unspecified.
    fn query(
        &self,
        filter: &Filter,
        comparator: Option<&[u8]>,
    ) -> StoreResult<Vec<(Bytes, Bytes)>>;

    /// Run an entry agent against a single key. `None` means the agent
    /// produced no result for that key.
    fn invoke(&self, agent: &[u8], key: &[u8]) -> StoreResult<Option<Bytes>>;
    /// Run an entry agent against every entry matched by the filter.
    fn invoke_filter(&self, agent: &[u8], filter: &Filter) -> StoreResult<Vec<(Bytes, Bytes)>>;
    /// Aggregate over an explicit key set (when non-empty) or a filter.
    fn aggregate(
        &self,
        agent: &[u8],
        keys: &[Bytes],
        filter: Option<&Filter>,
    ) -> StoreResult<Bytes>;

    fn install_trigger(&self, trigger: Bytes) -> StoreResult<()>;
    fn remove_trigger(&self, trigger: &[u8]) -> StoreResult<()>;

    /// Up to `max` entries in key order, strictly after `cursor` (from the
    /// start when `cursor` is `None`). Backs the legacy paging engine.
    fn entries_after(
        &self,
        cursor: Option<&[u8]>,
        max: usize,
    ) -> StoreResult<Vec<(Bytes, Bytes)>>;

    /// Register a watcher. Records arrive in mutation order; the sender side
    /// is dropped once the cache is destroyed.
    fn watch(&self) -> mpsc::UnboundedReceiver<ChangeRecord>;
}

// ---------------------------------------------------------------------------
// Queue contract
// ---------------------------------------------------------------------------

/// Which end of a queue an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueEnd {
    Head,
    Tail,
}

/// Named queue flavors. `Queue` and `Deque` address the same underlying
/// structure; `PagedQueue` is structurally distinct and never interchangeable
/// with the other two for the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueKind {
    Queue,
    Deque,
    PagedQueue,
}

impl QueueKind {
    pub fn class(self) -> QueueClass {
        match self {
            QueueKind::Queue | QueueKind::Deque => QueueClass::Shared,
            QueueKind::PagedQueue => QueueClass::Paged,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QueueKind::Queue => "Queue",
            QueueKind::Deque => "Deque",
            QueueKind::PagedQueue => "PagedQueue",
        }
    }
}

/// Compatibility class used for ensure-time kind checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueClass {
    Shared,
    Paged,
}

impl QueueClass {
    fn label(self) -> &'static str {
        match self {
            QueueClass::Shared => "Queue/Deque",
            QueueClass::Paged => "PagedQueue",
        }
    }
}

/// Contract the proxy consumes for one named queue.
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn offer(&self, end: QueueEnd, value: Bytes) -> StoreResult<bool>;
    fn peek(&self, end: QueueEnd) -> StoreResult<Option<Bytes>>;
    fn poll(&self, end: QueueEnd) -> StoreResult<Option<Bytes>>;
    fn size(&self) -> StoreResult<usize>;
    fn clear(&self) -> StoreResult<()>;
    fn destroy(&self) -> StoreResult<()>;
    /// Whether the queue currently accepts offers.
    fn is_ready(&self) -> StoreResult<bool>;
}

// ---------------------------------------------------------------------------
// Backend factory and registry
// ---------------------------------------------------------------------------

/// Factory seam for the actual storage engine. The runtime installs one
/// backend; everything above it only sees the store traits.
pub trait StorageBackend: Send + Sync {
    fn create_cache(&self, scope: &str, name: &str) -> Arc<dyn CacheStore>;
    fn create_queue(&self, scope: &str, name: &str, kind: QueueKind) -> Arc<dyn QueueStore>;
}

struct QueueSlot {
    class: QueueClass,
    store: Arc<dyn QueueStore>,
}

/// Process-wide create-or-fetch table of named resources.
///
/// Ensure calls are atomic insert-if-absent: the first ensure creates the
/// underlying resource, later ensures return the same handle. Destroy removes
/// the mapping so a later ensure under the same name starts fresh.
pub struct StoreRegistry {
    backend: Arc<dyn StorageBackend>,
    caches: RwLock<HashMap<(String, String), Arc<dyn CacheStore>>>,
    queues: RwLock<HashMap<(String, String), QueueSlot>>,
}

impl StoreRegistry {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            caches: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
        }
    }

    pub fn ensure_cache(&self, scope: &str, name: &str) -> Arc<dyn CacheStore> {
        if let Some(store) = self
            .caches
            .read()
            .get(&(scope.to_string(), name.to_string()))
        {
            return store.clone();
        }
        let mut caches = self.caches.write();
        caches
            .entry((scope.to_string(), name.to_string()))
            .or_insert_with(|| self.backend.create_cache(scope, name))
            .clone()
    }

    pub fn ensure_queue(
        &self,
        scope: &str,
        name: &str,
        kind: QueueKind,
    ) -> StoreResult<Arc<dyn QueueStore>> {
        let key = (scope.to_string(), name.to_string());
        let mut queues = self.queues.write();
        if let Some(slot) = queues.get(&key) {
            if slot.class != kind.class() {
                return Err(StoreError::IncompatibleKind {
                    name: name.to_string(),
                    existing: slot.class.label(),
                    requested: kind.label(),
                });
            }
            return Ok(slot.store.clone());
        }
        let store = self.backend.create_queue(scope, name, kind);
        queues.insert(
            key,
            QueueSlot {
                class: kind.class(),
                store: store.clone(),
            },
        );
        Ok(store)
    }

    /// Forget a destroyed cache so the name can be re-created later.
    pub fn release_cache(&self, scope: &str, name: &str) {
        self.caches
            .write()
            .remove(&(scope.to_string(), name.to_string()));
    }

    /// Forget a destroyed queue.
    pub fn release_queue(&self, scope: &str, name: &str) {
        self.queues
            .write()
            .remove(&(scope.to_string(), name.to_string()));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
