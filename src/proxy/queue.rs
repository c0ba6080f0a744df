//! Queue sub-protocol engine.
//!
//! Point operations on named queue resources. Queue channel ids come from a
//! separate id space than cache channel ids; the typed request enumeration
//! keeps the two domains apart so an id never crosses engines.

use crate::format::PayloadFormat;
use crate::ops::metrics::ProxyMetrics;
use crate::proxy::error::ProxyResult;
use crate::proxy::protocol::{ChannelId, OptionalValue, QueueOp, TypedResponse};
use crate::proxy::registry::{ChannelRegistry, QueueChannel};
use crate::proxy::session::RequestStream;
use crate::storage::{QueueEnd, StoreRegistry};
use std::sync::Arc;

pub struct QueueEngine {
    scope: String,
    stores: Arc<StoreRegistry>,
    registry: Arc<ChannelRegistry>,
    format: Arc<dyn PayloadFormat>,
    metrics: Arc<ProxyMetrics>,
}

impl QueueEngine {
    pub fn new(
        scope: String,
        stores: Arc<StoreRegistry>,
        registry: Arc<ChannelRegistry>,
        format: Arc<dyn PayloadFormat>,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self {
            scope,
            stores,
            registry,
            format,
            metrics,
        }
    }

    /// Run one queue request, streaming result messages to `stream`.
    pub fn execute(
        &self,
        channel_id: ChannelId,
        op: QueueOp,
        stream: &RequestStream,
    ) -> ProxyResult<()> {
        self.metrics.request_seen();
        match op {
            QueueOp::EnsureQueue { name, kind } => {
                let store = self.stores.ensure_queue(&self.scope, &name, kind)?;
                let id = self.registry.ensure_queue(&name, kind, store)?;
                stream.message(TypedResponse::ChannelId { channel_id: id });
                Ok(())
            }
            op => {
                let channel = self.registry.queue(channel_id)?;
                self.execute_on(&channel, op, stream)
            }
        }
    }

    fn execute_on(
        &self,
        channel: &Arc<QueueChannel>,
        op: QueueOp,
        stream: &RequestStream,
    ) -> ProxyResult<()> {
        let store = &channel.store;
        match op {
            QueueOp::EnsureQueue { .. } => unreachable!("handled in execute"),
            QueueOp::PeekHead => {
                let value = store.peek(QueueEnd::Head)?;
                stream.message(TypedResponse::Value(OptionalValue::from_option(value)));
            }
            QueueOp::PeekTail => {
                let value = store.peek(QueueEnd::Tail)?;
                stream.message(TypedResponse::Value(OptionalValue::from_option(value)));
            }
            QueueOp::PollHead => {
                let value = store.poll(QueueEnd::Head)?;
                stream.message(TypedResponse::Value(OptionalValue::from_option(value)));
            }
            QueueOp::PollTail => {
                let value = store.poll(QueueEnd::Tail)?;
                stream.message(TypedResponse::Value(OptionalValue::from_option(value)));
            }
            QueueOp::OfferHead { value } => {
                let value = self.format.decode(&value)?;
                let succeeded = store.offer(QueueEnd::Head, value)?;
                stream.message(TypedResponse::Flag { value: succeeded });
            }
            QueueOp::OfferTail { value } => {
                let value = self.format.decode(&value)?;
                let succeeded = store.offer(QueueEnd::Tail, value)?;
                stream.message(TypedResponse::Flag { value: succeeded });
            }
            QueueOp::IsReady => {
                stream.message(TypedResponse::Flag {
                    value: store.is_ready()?,
                });
            }
            QueueOp::IsEmpty => {
                stream.message(TypedResponse::Flag {
                    value: store.size()? == 0,
                });
            }
            QueueOp::Size => {
                stream.message(TypedResponse::Count {
                    value: store.size()? as i64,
                });
            }
            QueueOp::Clear => store.clear()?,
            QueueOp::Destroy => {
                store.destroy()?;
                self.stores.release_queue(&self.scope, &channel.name);
                channel.mark_destroyed();
            }
        }
        Ok(())
    }
}
