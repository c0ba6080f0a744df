//! Per-connection resource registry.
//!
//! Maps (name, kind-class) to small integer channel ids. Ensure calls are
//! idempotent insert-if-absent; ids are allocated once and never change
//! meaning for the life of the connection. Cache and queue channels draw
//! from separate id spaces, both starting at 1 (0 is reserved/invalid).
//!
//! A destroyed channel keeps its slot so the terminal lifecycle event can
//! still name it, but every later operation on the id is rejected;
//! re-ensuring the same name after destroy allocates a fresh channel.

use crate::proxy::error::{ProxyError, ProxyResult};
use crate::proxy::protocol::ChannelId;
use crate::storage::{CacheStore, QueueKind, QueueStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One ensured cache on this connection.
pub struct CacheChannel {
    pub id: ChannelId,
    pub name: String,
    pub store: Arc<dyn CacheStore>,
    destroyed: AtomicBool,
}

impl CacheChannel {
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

/// One ensured queue on this connection.
pub struct QueueChannel {
    pub id: ChannelId,
    pub name: String,
    pub kind: QueueKind,
    pub store: Arc<dyn QueueStore>,
    destroyed: AtomicBool,
}

impl QueueChannel {
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

#[derive(Default)]
struct Inner {
    next_cache_id: ChannelId,
    next_queue_id: ChannelId,
    cache_ids: HashMap<String, ChannelId>,
    caches: HashMap<ChannelId, Arc<CacheChannel>>,
    queue_ids: HashMap<String, ChannelId>,
    queues: HashMap<ChannelId, Arc<QueueChannel>>,
}

/// Channel table for a single connection. Concurrent lookups are the hot
/// path; ensures serialize on the write lock.
#[derive(Default)]
pub struct ChannelRegistry {
    inner: RwLock<Inner>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate or fetch the channel id for a cache name.
    pub fn ensure_cache(&self, name: &str, store: Arc<dyn CacheStore>) -> ChannelId {
        let mut inner = self.inner.write();
        if let Some(&id) = inner.cache_ids.get(name) {
            let live = inner
                .caches
                .get(&id)
                .is_some_and(|channel| !channel.is_destroyed());
            if live {
                return id;
            }
        }
        inner.next_cache_id += 1;
        let id = inner.next_cache_id;
        inner.cache_ids.insert(name.to_string(), id);
        inner.caches.insert(
            id,
            Arc::new(CacheChannel {
                id,
                name: name.to_string(),
                store,
                destroyed: AtomicBool::new(false),
            }),
        );
        id
    }

    /// Allocate or fetch the channel id for a queue name of a compatible
    /// kind.
    pub fn ensure_queue(
        &self,
        name: &str,
        kind: QueueKind,
        store: Arc<dyn QueueStore>,
    ) -> ProxyResult<ChannelId> {
        let mut inner = self.inner.write();
        if let Some(&id) = inner.queue_ids.get(name) {
            if let Some(channel) = inner.queues.get(&id) {
                if !channel.is_destroyed() {
                    if channel.kind.class() != kind.class() {
                        return Err(ProxyError::Invalid(format!(
                            "queue `{name}` already ensured as {}, not compatible with {}",
                            channel.kind.label(),
                            kind.label()
                        )));
                    }
                    return Ok(id);
                }
            }
        }
        inner.next_queue_id += 1;
        let id = inner.next_queue_id;
        inner.queue_ids.insert(name.to_string(), id);
        inner.queues.insert(
            id,
            Arc::new(QueueChannel {
                id,
                name: name.to_string(),
                kind,
                store,
                destroyed: AtomicBool::new(false),
            }),
        );
        Ok(id)
    }

    /// Resolve a cache channel for an operation.
    pub fn cache(&self, id: ChannelId) -> ProxyResult<Arc<CacheChannel>> {
        let inner = self.inner.read();
        let channel = inner
            .caches
            .get(&id)
            .cloned()
            .ok_or(ProxyError::UnknownChannel(id))?;
        if channel.is_destroyed() {
            return Err(ProxyError::ChannelDestroyed(id));
        }
        Ok(channel)
    }

    /// Resolve a queue channel for an operation.
    pub fn queue(&self, id: ChannelId) -> ProxyResult<Arc<QueueChannel>> {
        let inner = self.inner.read();
        let channel = inner
            .queues
            .get(&id)
            .cloned()
            .ok_or(ProxyError::UnknownChannel(id))?;
        if channel.is_destroyed() {
            return Err(ProxyError::ChannelDestroyed(id));
        }
        Ok(channel)
    }

    /// Cache channel ids currently tracking the named cache, destroyed ones
    /// included (they still need their terminal event).
    pub fn cache_channel(&self, id: ChannelId) -> Option<Arc<CacheChannel>> {
        self.inner.read().caches.get(&id).cloned()
    }
}
