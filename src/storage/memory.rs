//! Default in-memory storage backend.
//!
//! Entries live in a key-ordered map so the legacy paging engine gets stable
//! iteration. Time-to-live is enforced lazily: an expired entry is purged the
//! next time any operation touches it (or sweeps the map), emitting a
//! synthetic deletion record with `expired=true`.
//!
//! Agents and triggers are opaque bytes on the contract; this backend
//! understands a deliberately small vocabulary:
//! - entry agents: `get` (return the current value), `remove` (remove the
//!   entry, returning the old value)
//! - aggregators: `count` (matching entry count, u64 big-endian)
//! - triggers: `suffix:<bytes>` (append `<bytes>` to every written value)
//!
//! Anything else is rejected as unsupported, which the proxy reports as a
//! per-request collaborator error.

use super::{
    CacheStore, ChangeRecord, EntryChange, Filter, QueueKind, QueueStore, StorageBackend,
    StoreError, StoreResult,
};
use crate::storage::queue::MemoryQueue;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const TRIGGER_SUFFIX_PREFIX: &[u8] = b"suffix:";

const AGENT_GET: &[u8] = b"get";
const AGENT_REMOVE: &[u8] = b"remove";
const AGGREGATOR_COUNT: &[u8] = b"count";

#[derive(Debug, Clone)]
struct EntryRecord {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl EntryRecord {
    fn is_expired_at(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
struct IndexSpec {
    sorted: bool,
    comparator: Option<Bytes>,
}

#[derive(Default)]
struct CacheInner {
    entries: BTreeMap<Bytes, EntryRecord>,
    indices: HashMap<Bytes, IndexSpec>,
    triggers: Vec<Bytes>,
    watchers: Vec<mpsc::UnboundedSender<ChangeRecord>>,
    destroyed: bool,
}

impl CacheInner {
    fn emit(&mut self, record: ChangeRecord) {
        self.watchers.retain(|tx| tx.send(record.clone()).is_ok());
    }

    /// Remove one entry if its deadline passed, emitting the expiry record.
    fn purge_if_expired(&mut self, key: &[u8], now: Instant) {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|record| record.is_expired_at(now));
        if expired {
            if let Some(record) = self.entries.remove(key) {
                self.emit(ChangeRecord::Entry(EntryChange {
                    key: Bytes::copy_from_slice(key),
                    old_value: Some(record.value),
                    new_value: None,
                    synthetic: true,
                    expired: true,
                    transformed: false,
                }));
            }
        }
    }

    /// Purge every expired entry.
    fn sweep(&mut self, now: Instant) {
        let expired: Vec<Bytes> = self
            .entries
            .iter()
            .filter(|(_, record)| record.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.purge_if_expired(&key, now);
        }
    }

    /// Run the installed triggers over a value about to be written.
    fn apply_triggers(&self, value: Bytes) -> (Bytes, bool) {
        if self.triggers.is_empty() {
            return (value, false);
        }
        let mut out = value.to_vec();
        for trigger in &self.triggers {
            if let Some(suffix) = trigger.strip_prefix(TRIGGER_SUFFIX_PREFIX) {
                out.extend_from_slice(suffix);
            }
        }
        (Bytes::from(out), true)
    }

    fn write(&mut self, key: Bytes, value: Bytes, ttl: Option<Duration>, now: Instant) {
        self.purge_if_expired(&key, now);
        let (value, transformed) = self.apply_triggers(value);
        let old = self.entries.insert(
            key.clone(),
            EntryRecord {
                value: value.clone(),
                expires_at: ttl.map(|d| now + d),
            },
        );
        self.emit(ChangeRecord::Entry(EntryChange {
            key,
            old_value: old.map(|record| record.value),
            new_value: Some(value),
            synthetic: false,
            expired: false,
            transformed,
        }));
    }

    fn delete(&mut self, key: &[u8]) -> Option<Bytes> {
        let old = self.entries.remove(key).map(|record| record.value);
        if let Some(old_value) = &old {
            self.emit(ChangeRecord::Entry(EntryChange {
                key: Bytes::copy_from_slice(key),
                old_value: Some(old_value.clone()),
                new_value: None,
                synthetic: false,
                expired: false,
                transformed: false,
            }));
        }
        old
    }
}

/// In-memory cache store with lazy TTL expiry and change broadcast.
pub struct MemoryCache {
    name: String,
    inner: Mutex<CacheInner>,
}

impl MemoryCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    fn alive(&self) -> StoreResult<parking_lot::MutexGuard<'_, CacheInner>> {
        let inner = self.inner.lock();
        if inner.destroyed {
            return Err(StoreError::Destroyed(self.name.clone()));
        }
        Ok(inner)
    }

    fn run_agent(
        inner: &mut CacheInner,
        agent: &[u8],
        key: &[u8],
        now: Instant,
    ) -> StoreResult<Option<Bytes>> {
        inner.purge_if_expired(key, now);
        match agent {
            AGENT_GET => Ok(inner.entries.get(key).map(|record| record.value.clone())),
            AGENT_REMOVE => Ok(inner.delete(key)),
            other => Err(StoreError::Unsupported {
                what: "agent",
                detail: String::from_utf8_lossy(other).into_owned(),
            }),
        }
    }
}

impl CacheStore for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        let mut inner = self.alive()?;
        inner.purge_if_expired(key, Instant::now());
        Ok(inner.entries.get(key).map(|record| record.value.clone()))
    }

    fn get_all(&self, keys: &[Bytes]) -> StoreResult<Vec<(Bytes, Bytes)>> {
        let mut inner = self.alive()?;
        let now = Instant::now();
        let mut found = Vec::new();
        for key in keys {
            inner.purge_if_expired(key, now);
            if let Some(record) = inner.entries.get(key.as_ref()) {
                found.push((key.clone(), record.value.clone()));
            }
        }
        Ok(found)
    }

    fn put(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> StoreResult<Option<Bytes>> {
        let mut inner = self.alive()?;
        let now = Instant::now();
        inner.purge_if_expired(&key, now);
        let old = inner.entries.get(&key).map(|record| record.value.clone());
        inner.write(key, value, ttl, now);
        Ok(old)
    }

    fn put_all(&self, entries: Vec<(Bytes, Bytes)>, ttl: Option<Duration>) -> StoreResult<()> {
        let mut inner = self.alive()?;
        let now = Instant::now();
        for (key, value) in entries {
            inner.write(key, value, ttl, now);
        }
        Ok(())
    }

    fn put_if_absent(&self, key: Bytes, value: Bytes) -> StoreResult<Option<Bytes>> {
        let mut inner = self.alive()?;
        let now = Instant::now();
        inner.purge_if_expired(&key, now);
        if let Some(record) = inner.entries.get(&key) {
            return Ok(Some(record.value.clone()));
        }
        inner.write(key, value, None, now);
        Ok(None)
    }

    fn remove(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        let mut inner = self.alive()?;
        inner.purge_if_expired(key, Instant::now());
        Ok(inner.delete(key))
    }

    fn remove_mapping(&self, key: &[u8], value: &[u8]) -> StoreResult<bool> {
        let mut inner = self.alive()?;
        inner.purge_if_expired(key, Instant::now());
        let matches = inner
            .entries
            .get(key)
            .is_some_and(|record| record.value.as_ref() == value);
        if matches {
            inner.delete(key);
        }
        Ok(matches)
    }

    fn replace(&self, key: &[u8], value: Bytes) -> StoreResult<Option<Bytes>> {
        let mut inner = self.alive()?;
        let now = Instant::now();
        inner.purge_if_expired(key, now);
        let old = inner.entries.get(key).map(|record| record.value.clone());
        if old.is_some() {
            inner.write(Bytes::copy_from_slice(key), value, None, now);
        }
        Ok(old)
    }

    fn replace_mapping(&self, key: &[u8], expect: &[u8], value: Bytes) -> StoreResult<bool> {
        let mut inner = self.alive()?;
        let now = Instant::now();
        inner.purge_if_expired(key, now);
        let matches = inner
            .entries
            .get(key)
            .is_some_and(|record| record.value.as_ref() == expect);
        if matches {
            inner.write(Bytes::copy_from_slice(key), value, None, now);
        }
        Ok(matches)
    }

    fn contains_key(&self, key: &[u8]) -> StoreResult<bool> {
        let mut inner = self.alive()?;
        inner.purge_if_expired(key, Instant::now());
        Ok(inner.entries.contains_key(key))
    }

    fn contains_value(&self, value: &[u8]) -> StoreResult<bool> {
        let mut inner = self.alive()?;
        inner.sweep(Instant::now());
        Ok(inner
            .entries
            .values()
            .any(|record| record.value.as_ref() == value))
    }

    fn size(&self) -> StoreResult<usize> {
        let mut inner = self.alive()?;
        inner.sweep(Instant::now());
        Ok(inner.entries.len())
    }

    fn clear(&self) -> StoreResult<()> {
        let mut inner = self.alive()?;
        inner.sweep(Instant::now());
        let keys: Vec<Bytes> = inner.entries.keys().cloned().collect();
        for key in keys {
            inner.delete(&key);
        }
        Ok(())
    }

    fn truncate(&self) -> StoreResult<()> {
        let mut inner = self.alive()?;
        inner.entries.clear();
        inner.emit(ChangeRecord::Truncated);
        Ok(())
    }

    fn destroy(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.destroyed {
            return Ok(());
        }
        inner.destroyed = true;
        inner.entries.clear();
        inner.emit(ChangeRecord::Destroyed);
        // Dropping the senders closes every watcher after the terminal record.
        inner.watchers.clear();
        Ok(())
    }

    fn add_index(
        &self,
        extractor: Bytes,
        sorted: bool,
        comparator: Option<Bytes>,
    ) -> StoreResult<()> {
        let mut inner = self.alive()?;
        inner
            .indices
            .insert(extractor, IndexSpec { sorted, comparator });
        Ok(())
    }

    fn remove_index(&self, extractor: &[u8]) -> StoreResult<()> {
        let mut inner = self.alive()?;
        inner.indices.remove(extractor);
        Ok(())
    }

    fn query(
        &self,
        filter: &Filter,
        comparator: Option<&[u8]>,
    ) -> StoreResult<Vec<(Bytes, Bytes)>> {
        let mut inner = self.alive()?;
        inner.sweep(Instant::now());
        let mut matched: Vec<(Bytes, Bytes)> = inner
            .entries
            .iter()
            .filter(|(key, record)| filter.matches(key, &record.value))
            .map(|(key, record)| (key.clone(), record.value.clone()))
            .collect();
        // Any supplied comparator orders by key bytes ascending in this
        // backend; map iteration already yields that order, so the sort is a
        // stable no-op kept for contract clarity.
        if comparator.is_some() {
            matched.sort_by(|a, b| a.0.cmp(&b.0));
        }
        Ok(matched)
    }

    fn invoke(&self, agent: &[u8], key: &[u8]) -> StoreResult<Option<Bytes>> {
        let mut inner = self.alive()?;
        Self::run_agent(&mut inner, agent, key, Instant::now())
    }

    fn invoke_filter(&self, agent: &[u8], filter: &Filter) -> StoreResult<Vec<(Bytes, Bytes)>> {
        let mut inner = self.alive()?;
        let now = Instant::now();
        inner.sweep(now);
        let targets: Vec<Bytes> = inner
            .entries
            .iter()
            .filter(|(key, record)| filter.matches(key, &record.value))
            .map(|(key, _)| key.clone())
            .collect();
        let mut results = Vec::new();
        for key in targets {
            if let Some(result) = Self::run_agent(&mut inner, agent, &key, now)? {
                results.push((key, result));
            }
        }
        Ok(results)
    }

    fn aggregate(
        &self,
        agent: &[u8],
        keys: &[Bytes],
        filter: Option<&Filter>,
    ) -> StoreResult<Bytes> {
        let mut inner = self.alive()?;
        let now = Instant::now();
        inner.sweep(now);
        if agent != AGGREGATOR_COUNT {
            return Err(StoreError::Unsupported {
                what: "aggregator",
                detail: String::from_utf8_lossy(agent).into_owned(),
            });
        }
        let count = if keys.is_empty() {
            let filter = filter.unwrap_or(&Filter::All);
            inner
                .entries
                .iter()
                .filter(|(key, record)| filter.matches(key, &record.value))
                .count()
        } else {
            keys.iter()
                .filter(|key| inner.entries.contains_key(key.as_ref()))
                .count()
        };
        Ok(Bytes::copy_from_slice(&(count as u64).to_be_bytes()))
    }

    fn install_trigger(&self, trigger: Bytes) -> StoreResult<()> {
        let mut inner = self.alive()?;
        if !trigger.starts_with(TRIGGER_SUFFIX_PREFIX) {
            return Err(StoreError::Unsupported {
                what: "trigger",
                detail: String::from_utf8_lossy(&trigger).into_owned(),
            });
        }
        if !inner.triggers.contains(&trigger) {
            inner.triggers.push(trigger);
        }
        Ok(())
    }

    fn remove_trigger(&self, trigger: &[u8]) -> StoreResult<()> {
        let mut inner = self.alive()?;
        inner.triggers.retain(|t| t.as_ref() != trigger);
        Ok(())
    }

    fn entries_after(
        &self,
        cursor: Option<&[u8]>,
        max: usize,
    ) -> StoreResult<Vec<(Bytes, Bytes)>> {
        let mut inner = self.alive()?;
        inner.sweep(Instant::now());
        let range = match cursor {
            Some(cursor) => inner
                .entries
                .range::<[u8], _>((Bound::Excluded(cursor), Bound::Unbounded)),
            None => inner.entries.range::<[u8], _>(..),
        };
        Ok(range
            .take(max)
            .map(|(key, record)| (key.clone(), record.value.clone()))
            .collect())
    }

    fn watch(&self) -> mpsc::UnboundedReceiver<ChangeRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if inner.destroyed {
            // Late watcher on a dead cache: deliver the terminal record only.
            let _ = tx.send(ChangeRecord::Destroyed);
        } else {
            inner.watchers.push(tx);
        }
        rx
    }
}

/// Backend producing in-memory caches and queues.
#[derive(Default)]
pub struct MemoryBackend;

impl MemoryBackend {
    fn label(scope: &str, name: &str) -> String {
        if scope.is_empty() {
            name.to_string()
        } else {
            format!("{scope}/{name}")
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn create_cache(&self, scope: &str, name: &str) -> Arc<dyn CacheStore> {
        Arc::new(MemoryCache::new(Self::label(scope, name)))
    }

    fn create_queue(&self, scope: &str, name: &str, kind: QueueKind) -> Arc<dyn QueueStore> {
        Arc::new(MemoryQueue::new(Self::label(scope, name), kind))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
