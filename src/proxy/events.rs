//! Event subscription manager.
//!
//! Owns the per-connection mapping from (channel, selector) to active
//! subscriptions and turns storage change records into push messages on the
//! connection outbox. Delivery runs on one task per subscribed channel, so
//! events for a channel retain the underlying mutation order while staying
//! independent of any request/response exchange.
//!
//! Delivery rules per mutation:
//! - one event per matching keyed subscription;
//! - one merged event carrying the id union of every matching tagged filter
//!   subscription;
//! - one untagged event per matching filter subscription registered without
//!   a filter id.
//! Keyed and filtered deliveries for the same mutation are never deduplicated
//! against each other.

use crate::ops::metrics::ProxyMetrics;
use crate::proxy::error::{ProxyError, ProxyResult};
use crate::proxy::protocol::{ChannelId, FilterId, MapEvent, OptionalValue, TypedResponse};
use crate::proxy::registry::CacheChannel;
use crate::proxy::session::Outbox;
use crate::storage::{ChangeRecord, EntryChange, Filter};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

struct KeySub {
    uid: i64,
    lite: bool,
}

struct FilterSub {
    uid: i64,
    filter: Filter,
    filter_id: Option<FilterId>,
    lite: bool,
}

struct ChannelSubs {
    keyed: HashMap<Bytes, KeySub>,
    filtered: Vec<FilterSub>,
    task: tokio::task::JoinHandle<()>,
}

impl ChannelSubs {
    fn is_empty(&self) -> bool {
        self.keyed.is_empty() && self.filtered.is_empty()
    }

    fn len(&self) -> usize {
        self.keyed.len() + self.filtered.len()
    }
}

/// Subscription table plus delivery tasks for one connection.
pub struct SubscriptionManager {
    outbox: Outbox,
    metrics: Arc<ProxyMetrics>,
    channels: Mutex<HashMap<ChannelId, ChannelSubs>>,
    next_uid: AtomicI64,
}

impl SubscriptionManager {
    pub fn new(outbox: Outbox, metrics: Arc<ProxyMetrics>) -> Self {
        Self {
            outbox,
            metrics,
            channels: Mutex::new(HashMap::new()),
            next_uid: AtomicI64::new(0),
        }
    }

    fn mint_uid(&self) -> i64 {
        self.next_uid.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a keyed subscription. Idempotent: re-subscribing the same key
    /// returns the original uid without re-priming.
    pub fn subscribe_key(
        self: &Arc<Self>,
        channel: &Arc<CacheChannel>,
        key: Bytes,
        priming: bool,
        lite: bool,
    ) -> ProxyResult<i64> {
        let mut channels = self.channels.lock();
        let subs = Self::channel_entry(self, &mut channels, channel);
        if let Some(existing) = subs.keyed.get(&key) {
            return Ok(existing.uid);
        }
        let uid = self.mint_uid();
        subs.keyed.insert(key.clone(), KeySub { uid, lite });
        self.metrics.subscription_opened();
        if priming {
            let current = channel.store.get(&key)?;
            self.push_priming(channel.id, key, current, &[]);
        }
        Ok(uid)
    }

    /// Register a filter subscription. Priming is only accepted for filters
    /// with a finite enumerable key set.
    pub fn subscribe_filter(
        self: &Arc<Self>,
        channel: &Arc<CacheChannel>,
        filter: Filter,
        filter_id: Option<FilterId>,
        priming: bool,
        lite: bool,
    ) -> ProxyResult<i64> {
        if priming && filter.key_set().is_none() {
            return Err(ProxyError::Invalid(
                "priming filter subscriptions require a key-set filter".to_string(),
            ));
        }
        let mut channels = self.channels.lock();
        let subs = Self::channel_entry(self, &mut channels, channel);
        if let Some(existing) = subs.filtered.iter().find(|sub| sub.filter == filter) {
            return Ok(existing.uid);
        }
        let uid = self.mint_uid();
        subs.filtered.push(FilterSub {
            uid,
            filter: filter.clone(),
            filter_id,
            lite,
        });
        self.metrics.subscription_opened();
        if priming {
            let tag: Vec<FilterId> = filter_id.into_iter().collect();
            if let Some(keys) = filter.key_set() {
                for key in keys {
                    let current = channel.store.get(key)?;
                    self.push_priming(channel.id, key.clone(), current, &tag);
                }
            }
        }
        Ok(uid)
    }

    /// Remove a keyed subscription, returning its uid when it existed.
    pub fn unsubscribe_key(&self, channel_id: ChannelId, key: &[u8]) -> Option<i64> {
        let mut channels = self.channels.lock();
        let subs = channels.get_mut(&channel_id)?;
        let removed = subs.keyed.remove(key).map(|sub| sub.uid);
        if removed.is_some() {
            self.metrics.subscription_closed();
        }
        if subs.is_empty() {
            if let Some(subs) = channels.remove(&channel_id) {
                subs.task.abort();
            }
        }
        removed
    }

    /// Remove a filter subscription, returning its uid when it existed.
    pub fn unsubscribe_filter(&self, channel_id: ChannelId, filter: &Filter) -> Option<i64> {
        let mut channels = self.channels.lock();
        let subs = channels.get_mut(&channel_id)?;
        let position = subs.filtered.iter().position(|sub| &sub.filter == filter)?;
        let removed = subs.filtered.remove(position);
        self.metrics.subscription_closed();
        if subs.is_empty() {
            if let Some(subs) = channels.remove(&channel_id) {
                subs.task.abort();
            }
        }
        Some(removed.uid)
    }

    /// Release everything; called when the connection goes away.
    pub fn shutdown(&self) {
        let mut channels = self.channels.lock();
        for (_, subs) in channels.drain() {
            for _ in 0..subs.len() {
                self.metrics.subscription_closed();
            }
            subs.task.abort();
        }
    }

    fn channel_entry<'a>(
        manager: &Arc<Self>,
        channels: &'a mut HashMap<ChannelId, ChannelSubs>,
        channel: &Arc<CacheChannel>,
    ) -> &'a mut ChannelSubs {
        channels.entry(channel.id).or_insert_with(|| {
            let task = Self::spawn_delivery(manager.clone(), channel.clone());
            ChannelSubs {
                keyed: HashMap::new(),
                filtered: Vec::new(),
                task,
            }
        })
    }

    fn spawn_delivery(
        manager: Arc<Self>,
        channel: Arc<CacheChannel>,
    ) -> tokio::task::JoinHandle<()> {
        let mut watch = channel.store.watch();
        tokio::spawn(async move {
            while let Some(record) = watch.recv().await {
                match record {
                    ChangeRecord::Entry(change) => manager.deliver_entry(channel.id, &change),
                    ChangeRecord::Truncated => {
                        manager
                            .outbox
                            .push_event(TypedResponse::Truncated { channel_id: channel.id });
                    }
                    ChangeRecord::Destroyed => {
                        channel.mark_destroyed();
                        manager
                            .outbox
                            .push_event(TypedResponse::Destroyed { channel_id: channel.id });
                        manager.release_channel(channel.id);
                        break;
                    }
                }
            }
        })
    }

    fn release_channel(&self, channel_id: ChannelId) {
        let mut channels = self.channels.lock();
        if let Some(subs) = channels.remove(&channel_id) {
            for _ in 0..subs.len() {
                self.metrics.subscription_closed();
            }
            // The delivery task releasing its own channel returns right
            // after, so no abort is needed here.
        }
    }

    fn deliver_entry(&self, channel_id: ChannelId, change: &EntryChange) {
        let channels = self.channels.lock();
        let Some(subs) = channels.get(&channel_id) else {
            return;
        };

        if let Some(keyed) = subs.keyed.get(&change.key) {
            self.push_entry(channel_id, change, Vec::new(), keyed.lite);
        }

        let match_value = change
            .new_value
            .as_deref()
            .or(change.old_value.as_deref())
            .unwrap_or_default();
        let mut tagged: Vec<FilterId> = Vec::new();
        let mut tagged_all_lite = true;
        for sub in &subs.filtered {
            if !sub.filter.matches(&change.key, match_value) {
                continue;
            }
            match sub.filter_id {
                Some(id) => {
                    tagged.push(id);
                    tagged_all_lite &= sub.lite;
                }
                None => self.push_entry(channel_id, change, Vec::new(), sub.lite),
            }
        }
        if !tagged.is_empty() {
            tagged.sort_unstable();
            tagged.dedup();
            self.push_entry(channel_id, change, tagged, tagged_all_lite);
        }
    }

    fn push_entry(
        &self,
        channel_id: ChannelId,
        change: &EntryChange,
        filter_ids: Vec<FilterId>,
        lite: bool,
    ) {
        let (old_value, new_value) = if lite {
            (OptionalValue::absent(), OptionalValue::absent())
        } else {
            (
                OptionalValue::from_option(change.old_value.clone()),
                OptionalValue::from_option(change.new_value.clone()),
            )
        };
        self.push(MapEvent {
            channel_id,
            filter_ids,
            key: change.key.clone(),
            old_value,
            new_value,
            synthetic: change.synthetic,
            priming: false,
            expired: change.expired,
            transformed: change.transformed,
        });
    }

    /// Synthetic current-state event emitted while a priming subscription is
    /// being registered, ahead of its acknowledgment.
    fn push_priming(
        &self,
        channel_id: ChannelId,
        key: Bytes,
        current: Option<Bytes>,
        filter_ids: &[FilterId],
    ) {
        self.push(MapEvent {
            channel_id,
            filter_ids: filter_ids.to_vec(),
            key,
            old_value: OptionalValue::absent(),
            new_value: OptionalValue::from_option(current),
            synthetic: true,
            priming: true,
            expired: false,
            transformed: false,
        });
    }

    fn push(&self, event: MapEvent) {
        self.metrics.event_delivered();
        self.outbox.push_event(TypedResponse::Event(event));
    }
}
