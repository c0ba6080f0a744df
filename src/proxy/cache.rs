//! Cache sub-protocol engine.
//!
//! Executes one typed cache request against the storage collaborator and
//! frames the results. Point operations yield a single message; bulk and
//! query operations yield one message per element. The session controller
//! writes the terminal frame, so every path here either streams messages and
//! returns `Ok` or returns the error that becomes the terminal Error frame.

use crate::format::PayloadFormat;
use crate::ops::metrics::ProxyMetrics;
use crate::proxy::error::{ProxyError, ProxyResult};
use crate::proxy::events::SubscriptionManager;
use crate::proxy::protocol::{
    BinaryEntry, CacheOp, ChannelId, ListenerSelector, OptionalValue, TypedResponse,
};
use crate::proxy::registry::{CacheChannel, ChannelRegistry};
use crate::proxy::session::RequestStream;
use crate::storage::{Filter, StoreRegistry};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

pub struct CacheEngine {
    scope: String,
    stores: Arc<StoreRegistry>,
    registry: Arc<ChannelRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    format: Arc<dyn PayloadFormat>,
    metrics: Arc<ProxyMetrics>,
}

impl CacheEngine {
    pub fn new(
        scope: String,
        stores: Arc<StoreRegistry>,
        registry: Arc<ChannelRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        format: Arc<dyn PayloadFormat>,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self {
            scope,
            stores,
            registry,
            subscriptions,
            format,
            metrics,
        }
    }

    /// Gate an inbound value through the negotiated payload format. The
    /// bytes stay opaque; the format only gets to reject them.
    fn decode_value(&self, raw: Bytes) -> ProxyResult<Bytes> {
        Ok(self.format.decode(&raw)?)
    }

    /// Run one cache request, streaming result messages to `stream`.
    pub fn execute(
        &self,
        channel_id: ChannelId,
        op: CacheOp,
        stream: &RequestStream,
    ) -> ProxyResult<()> {
        self.metrics.request_seen();
        match op {
            CacheOp::EnsureCache { name } => {
                let store = self.stores.ensure_cache(&self.scope, &name);
                let id = self.registry.ensure_cache(&name, store);
                stream.message(TypedResponse::ChannelId { channel_id: id });
                Ok(())
            }
            op => {
                let channel = self.registry.cache(channel_id)?;
                self.execute_on(&channel, op, stream)
            }
        }
    }

    fn execute_on(
        &self,
        channel: &Arc<CacheChannel>,
        op: CacheOp,
        stream: &RequestStream,
    ) -> ProxyResult<()> {
        let store = &channel.store;
        match op {
            CacheOp::EnsureCache { .. } => unreachable!("handled in execute"),
            CacheOp::Get { key } => {
                let value = store.get(&key)?;
                stream.message(TypedResponse::Value(OptionalValue::from_option(value)));
            }
            CacheOp::GetAll { keys } => {
                for (key, value) in store.get_all(&keys)? {
                    stream.message(TypedResponse::Entry(BinaryEntry::new(key, value)));
                }
            }
            CacheOp::Put {
                key,
                value,
                ttl_millis,
            } => {
                let value = self.decode_value(value)?;
                let previous = store.put(key, value, ttl_millis.map(Duration::from_millis))?;
                stream.message(TypedResponse::Value(OptionalValue::from_option(previous)));
            }
            CacheOp::PutAll {
                entries,
                ttl_millis,
            } => {
                let pairs = entries
                    .into_iter()
                    .map(|entry| Ok((entry.key, self.decode_value(entry.value)?)))
                    .collect::<ProxyResult<Vec<_>>>()?;
                store.put_all(pairs, ttl_millis.map(Duration::from_millis))?;
            }
            CacheOp::PutIfAbsent { key, value } => {
                let value = self.decode_value(value)?;
                let previous = store.put_if_absent(key, value)?;
                stream.message(TypedResponse::Value(OptionalValue::from_option(previous)));
            }
            CacheOp::Remove { key } => {
                let previous = store.remove(&key)?;
                stream.message(TypedResponse::Value(OptionalValue::from_option(previous)));
            }
            CacheOp::RemoveMapping { key, value } => {
                let removed = store.remove_mapping(&key, &value)?;
                stream.message(TypedResponse::Flag { value: removed });
            }
            CacheOp::Replace { key, value } => {
                let value = self.decode_value(value)?;
                let previous = store.replace(&key, value)?;
                stream.message(TypedResponse::Value(OptionalValue::from_option(previous)));
            }
            CacheOp::ReplaceMapping { key, from, to } => {
                let to = self.decode_value(to)?;
                let replaced = store.replace_mapping(&key, &from, to)?;
                stream.message(TypedResponse::Flag { value: replaced });
            }
            CacheOp::ContainsKey { key } => {
                stream.message(TypedResponse::Flag {
                    value: store.contains_key(&key)?,
                });
            }
            CacheOp::ContainsValue { value } => {
                stream.message(TypedResponse::Flag {
                    value: store.contains_value(&value)?,
                });
            }
            CacheOp::ContainsEntry { key, value } => {
                let present = store
                    .get(&key)?
                    .is_some_and(|current| current.as_ref() == value.as_ref());
                stream.message(TypedResponse::Flag { value: present });
            }
            CacheOp::Clear => store.clear()?,
            CacheOp::Truncate => store.truncate()?,
            CacheOp::Destroy => {
                store.destroy()?;
                self.stores.release_cache(&self.scope, &channel.name);
                channel.mark_destroyed();
            }
            CacheOp::Size => {
                stream.message(TypedResponse::Count {
                    value: store.size()? as i64,
                });
            }
            CacheOp::IsEmpty => {
                stream.message(TypedResponse::Flag {
                    value: store.size()? == 0,
                });
            }
            CacheOp::Index {
                add,
                extractor,
                sorted,
                comparator,
            } => {
                if extractor.is_empty() {
                    return Err(ProxyError::Invalid(
                        "index request requires an extractor".to_string(),
                    ));
                }
                if add {
                    store.add_index(extractor, sorted, comparator)?;
                } else {
                    store.remove_index(&extractor)?;
                }
            }
            CacheOp::QueryKeys { filter, comparator } => {
                let filter = filter.unwrap_or(Filter::All);
                for (key, _) in store.query(&filter, comparator.as_deref())? {
                    stream.message(TypedResponse::Key { key });
                }
            }
            CacheOp::QueryEntries { filter, comparator } => {
                let filter = filter.unwrap_or(Filter::All);
                for (key, value) in store.query(&filter, comparator.as_deref())? {
                    stream.message(TypedResponse::Entry(BinaryEntry::new(key, value)));
                }
            }
            CacheOp::QueryValues { filter, comparator } => {
                let filter = filter.unwrap_or(Filter::All);
                for (_, value) in store.query(&filter, comparator.as_deref())? {
                    stream.message(TypedResponse::Value(OptionalValue::of(value)));
                }
            }
            CacheOp::Invoke {
                agent,
                keys,
                filter,
            } => {
                if agent.is_empty() {
                    return Err(ProxyError::Invalid(
                        "invoke requires an entry agent".to_string(),
                    ));
                }
                if keys.is_empty() {
                    let filter = filter.unwrap_or(Filter::All);
                    for (key, result) in store.invoke_filter(&agent, &filter)? {
                        stream.message(TypedResponse::Entry(BinaryEntry::new(key, result)));
                    }
                } else {
                    for key in keys {
                        if let Some(result) = store.invoke(&agent, &key)? {
                            stream.message(TypedResponse::Entry(BinaryEntry::new(key, result)));
                        }
                    }
                }
            }
            CacheOp::Aggregate {
                agent,
                keys,
                filter,
            } => {
                if agent.is_empty() {
                    return Err(ProxyError::Invalid(
                        "aggregate requires an aggregator agent".to_string(),
                    ));
                }
                let result = store.aggregate(&agent, &keys, filter.as_ref())?;
                stream.message(TypedResponse::Value(OptionalValue::of(result)));
            }
            CacheOp::MapListener {
                subscribe,
                selector,
                filter_id,
                priming,
                lite,
                trigger,
            } => {
                if let Some(trigger) = trigger {
                    if subscribe {
                        store.install_trigger(trigger)?;
                    } else {
                        store.remove_trigger(&trigger)?;
                    }
                    stream.message(TypedResponse::ListenerAck {
                        subscribed: subscribe,
                        uid: 0,
                    });
                    return Ok(());
                }
                if subscribe {
                    let uid = match selector {
                        ListenerSelector::Key(key) => {
                            self.subscriptions
                                .subscribe_key(channel, key, priming, lite)?
                        }
                        ListenerSelector::Filter(filter) => self.subscriptions.subscribe_filter(
                            channel, filter, filter_id, priming, lite,
                        )?,
                    };
                    stream.message(TypedResponse::ListenerAck {
                        subscribed: true,
                        uid,
                    });
                } else {
                    let uid = match selector {
                        ListenerSelector::Key(key) => {
                            self.subscriptions.unsubscribe_key(channel.id, &key)
                        }
                        ListenerSelector::Filter(filter) => {
                            self.subscriptions.unsubscribe_filter(channel.id, &filter)
                        }
                    }
                    .unwrap_or(0);
                    stream.message(TypedResponse::ListenerAck {
                        subscribed: false,
                        uid,
                    });
                }
            }
        }
        Ok(())
    }
}
