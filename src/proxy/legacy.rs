//! Legacy unary surface (protocol v0).
//!
//! One call per cache operation, no envelope, no handshake, no multiplexing.
//! Every call is translated into a single-shot exchange against the same
//! cache engine that serves the multiplexed protocol, so the two surfaces
//! can never drift apart semantically. This is also the only surface that
//! exposes the page-cursor iteration calls.

use crate::ops::metrics::ProxyMetrics;
use crate::proxy::cache::CacheEngine;
use crate::proxy::error::{ProxyError, ProxyResult};
use crate::proxy::events::SubscriptionManager;
use crate::proxy::paging::{PageEntry, PagingEngine};
use crate::proxy::protocol::{
    BinaryEntry, CacheOp, OptionalValue, ResponsePayload, TypedResponse,
};
use crate::format::PassthroughFormat;
use crate::proxy::registry::ChannelRegistry;
use crate::proxy::session::{Outbox, RequestStream};
use crate::storage::{Filter, StoreRegistry};
use bytes::Bytes;
use std::sync::Arc;

pub struct LegacyFacade {
    stores: Arc<StoreRegistry>,
    metrics: Arc<ProxyMetrics>,
    paging: PagingEngine,
}

impl LegacyFacade {
    pub fn new(
        stores: Arc<StoreRegistry>,
        metrics: Arc<ProxyMetrics>,
        transfer_threshold: usize,
    ) -> Self {
        Self {
            stores,
            metrics,
            paging: PagingEngine::new(transfer_threshold),
        }
    }

    // -- point operations ---------------------------------------------------

    pub fn get(&self, scope: &str, name: &str, key: Bytes) -> ProxyResult<OptionalValue> {
        let messages = self.one_shot(scope, name, CacheOp::Get { key })?;
        Self::expect_value(messages)
    }

    pub fn put(
        &self,
        scope: &str,
        name: &str,
        key: Bytes,
        value: Bytes,
        ttl_millis: Option<u64>,
    ) -> ProxyResult<OptionalValue> {
        let messages = self.one_shot(
            scope,
            name,
            CacheOp::Put {
                key,
                value,
                ttl_millis,
            },
        )?;
        Self::expect_value(messages)
    }

    pub fn put_all(
        &self,
        scope: &str,
        name: &str,
        entries: Vec<BinaryEntry>,
        ttl_millis: Option<u64>,
    ) -> ProxyResult<()> {
        self.one_shot(
            scope,
            name,
            CacheOp::PutAll {
                entries,
                ttl_millis,
            },
        )?;
        Ok(())
    }

    pub fn put_if_absent(
        &self,
        scope: &str,
        name: &str,
        key: Bytes,
        value: Bytes,
    ) -> ProxyResult<OptionalValue> {
        let messages = self.one_shot(scope, name, CacheOp::PutIfAbsent { key, value })?;
        Self::expect_value(messages)
    }

    pub fn remove(&self, scope: &str, name: &str, key: Bytes) -> ProxyResult<OptionalValue> {
        let messages = self.one_shot(scope, name, CacheOp::Remove { key })?;
        Self::expect_value(messages)
    }

    pub fn remove_mapping(
        &self,
        scope: &str,
        name: &str,
        key: Bytes,
        value: Bytes,
    ) -> ProxyResult<bool> {
        let messages = self.one_shot(scope, name, CacheOp::RemoveMapping { key, value })?;
        Self::expect_flag(messages)
    }

    pub fn replace(
        &self,
        scope: &str,
        name: &str,
        key: Bytes,
        value: Bytes,
    ) -> ProxyResult<OptionalValue> {
        let messages = self.one_shot(scope, name, CacheOp::Replace { key, value })?;
        Self::expect_value(messages)
    }

    pub fn replace_mapping(
        &self,
        scope: &str,
        name: &str,
        key: Bytes,
        from: Bytes,
        to: Bytes,
    ) -> ProxyResult<bool> {
        let messages = self.one_shot(scope, name, CacheOp::ReplaceMapping { key, from, to })?;
        Self::expect_flag(messages)
    }

    pub fn contains_key(&self, scope: &str, name: &str, key: Bytes) -> ProxyResult<bool> {
        let messages = self.one_shot(scope, name, CacheOp::ContainsKey { key })?;
        Self::expect_flag(messages)
    }

    pub fn contains_value(&self, scope: &str, name: &str, value: Bytes) -> ProxyResult<bool> {
        let messages = self.one_shot(scope, name, CacheOp::ContainsValue { value })?;
        Self::expect_flag(messages)
    }

    pub fn contains_entry(
        &self,
        scope: &str,
        name: &str,
        key: Bytes,
        value: Bytes,
    ) -> ProxyResult<bool> {
        let messages = self.one_shot(scope, name, CacheOp::ContainsEntry { key, value })?;
        Self::expect_flag(messages)
    }

    pub fn size(&self, scope: &str, name: &str) -> ProxyResult<i64> {
        let messages = self.one_shot(scope, name, CacheOp::Size)?;
        match Self::single(messages)? {
            TypedResponse::Count { value } => Ok(value),
            other => Err(Self::shape_error(&other)),
        }
    }

    pub fn is_empty(&self, scope: &str, name: &str) -> ProxyResult<bool> {
        let messages = self.one_shot(scope, name, CacheOp::IsEmpty)?;
        Self::expect_flag(messages)
    }

    pub fn clear(&self, scope: &str, name: &str) -> ProxyResult<()> {
        self.one_shot(scope, name, CacheOp::Clear)?;
        Ok(())
    }

    pub fn truncate(&self, scope: &str, name: &str) -> ProxyResult<()> {
        self.one_shot(scope, name, CacheOp::Truncate)?;
        Ok(())
    }

    pub fn destroy(&self, scope: &str, name: &str) -> ProxyResult<()> {
        self.one_shot(scope, name, CacheOp::Destroy)?;
        Ok(())
    }

    pub fn index(
        &self,
        scope: &str,
        name: &str,
        add: bool,
        extractor: Bytes,
        sorted: bool,
        comparator: Option<Bytes>,
    ) -> ProxyResult<()> {
        self.one_shot(
            scope,
            name,
            CacheOp::Index {
                add,
                extractor,
                sorted,
                comparator,
            },
        )?;
        Ok(())
    }

    // -- bulk operations ----------------------------------------------------

    pub fn get_all(
        &self,
        scope: &str,
        name: &str,
        keys: Vec<Bytes>,
    ) -> ProxyResult<Vec<BinaryEntry>> {
        let messages = self.one_shot(scope, name, CacheOp::GetAll { keys })?;
        Ok(Self::collect_entries(messages))
    }

    pub fn query_keys(
        &self,
        scope: &str,
        name: &str,
        filter: Option<Filter>,
    ) -> ProxyResult<Vec<Bytes>> {
        let messages = self.one_shot(
            scope,
            name,
            CacheOp::QueryKeys {
                filter,
                comparator: None,
            },
        )?;
        Ok(messages
            .into_iter()
            .filter_map(|message| match message {
                TypedResponse::Key { key } => Some(key),
                _ => None,
            })
            .collect())
    }

    pub fn query_entries(
        &self,
        scope: &str,
        name: &str,
        filter: Option<Filter>,
    ) -> ProxyResult<Vec<BinaryEntry>> {
        let messages = self.one_shot(
            scope,
            name,
            CacheOp::QueryEntries {
                filter,
                comparator: None,
            },
        )?;
        Ok(Self::collect_entries(messages))
    }

    pub fn query_values(
        &self,
        scope: &str,
        name: &str,
        filter: Option<Filter>,
    ) -> ProxyResult<Vec<Bytes>> {
        let messages = self.one_shot(
            scope,
            name,
            CacheOp::QueryValues {
                filter,
                comparator: None,
            },
        )?;
        Ok(messages
            .into_iter()
            .filter_map(|message| match message {
                TypedResponse::Value(value) => value.into_option(),
                _ => None,
            })
            .collect())
    }

    pub fn invoke(
        &self,
        scope: &str,
        name: &str,
        agent: Bytes,
        keys: Vec<Bytes>,
        filter: Option<Filter>,
    ) -> ProxyResult<Vec<BinaryEntry>> {
        let messages = self.one_shot(
            scope,
            name,
            CacheOp::Invoke {
                agent,
                keys,
                filter,
            },
        )?;
        Ok(Self::collect_entries(messages))
    }

    pub fn aggregate(
        &self,
        scope: &str,
        name: &str,
        agent: Bytes,
        keys: Vec<Bytes>,
        filter: Option<Filter>,
    ) -> ProxyResult<OptionalValue> {
        let messages = self.one_shot(
            scope,
            name,
            CacheOp::Aggregate {
                agent,
                keys,
                filter,
            },
        )?;
        Self::expect_value(messages)
    }

    // -- page-cursor iteration ----------------------------------------------

    pub fn next_key_set_page(
        &self,
        scope: &str,
        name: &str,
        cookie: &[u8],
    ) -> ProxyResult<Vec<PageEntry>> {
        self.metrics.request_seen();
        let store = self.stores.ensure_cache(scope, name);
        self.paging.next_key_page(store.as_ref(), cookie)
    }

    pub fn next_entry_set_page(
        &self,
        scope: &str,
        name: &str,
        cookie: &[u8],
    ) -> ProxyResult<Vec<PageEntry>> {
        self.metrics.request_seen();
        let store = self.stores.ensure_cache(scope, name);
        self.paging.next_entry_page(store.as_ref(), cookie)
    }

    // -- translation helpers ------------------------------------------------

    /// Run one operation as an ephemeral single-request session against the
    /// shared engine.
    fn one_shot(&self, scope: &str, name: &str, op: CacheOp) -> ProxyResult<Vec<TypedResponse>> {
        let (outbox, mut rx) = Outbox::channel();
        let registry = Arc::new(ChannelRegistry::new());
        let subscriptions = Arc::new(SubscriptionManager::new(
            outbox.clone(),
            self.metrics.clone(),
        ));
        let engine = CacheEngine::new(
            scope.to_string(),
            self.stores.clone(),
            registry,
            subscriptions,
            Arc::new(PassthroughFormat),
            self.metrics.clone(),
        );

        let stream = RequestStream::new(1, outbox.clone());
        engine.execute(
            0,
            CacheOp::EnsureCache {
                name: name.to_string(),
            },
            &stream,
        )?;
        let channel_id = loop {
            match rx.try_recv() {
                Ok(frame) => {
                    if let ResponsePayload::Message(TypedResponse::ChannelId { channel_id }) =
                        frame.payload
                    {
                        break channel_id;
                    }
                }
                Err(_) => {
                    return Err(ProxyError::Invalid(
                        "ensure produced no channel id".to_string(),
                    ))
                }
            }
        };

        engine.execute(channel_id, op, &stream)?;
        let mut messages = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let ResponsePayload::Message(message) = frame.payload {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    fn single(mut messages: Vec<TypedResponse>) -> ProxyResult<TypedResponse> {
        if messages.len() != 1 {
            return Err(ProxyError::Invalid(format!(
                "expected exactly one result message, got {}",
                messages.len()
            )));
        }
        Ok(messages.remove(0))
    }

    fn expect_value(messages: Vec<TypedResponse>) -> ProxyResult<OptionalValue> {
        match Self::single(messages)? {
            TypedResponse::Value(value) => Ok(value),
            other => Err(Self::shape_error(&other)),
        }
    }

    fn expect_flag(messages: Vec<TypedResponse>) -> ProxyResult<bool> {
        match Self::single(messages)? {
            TypedResponse::Flag { value } => Ok(value),
            other => Err(Self::shape_error(&other)),
        }
    }

    fn collect_entries(messages: Vec<TypedResponse>) -> Vec<BinaryEntry> {
        messages
            .into_iter()
            .filter_map(|message| match message {
                TypedResponse::Entry(entry) => Some(entry),
                _ => None,
            })
            .collect()
    }

    fn shape_error(message: &TypedResponse) -> ProxyError {
        ProxyError::Invalid(format!("unexpected result message shape: {message:?}"))
    }
}
