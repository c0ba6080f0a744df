//! Inbound envelope and typed request enumerations.
//!
//! The request surface is a closed set of variants per sub-protocol; the
//! session controller dispatches by matching on the payload tag, never by
//! inspecting opaque bodies.

use super::types::{BinaryEntry, ChannelId, EnvelopeId, FilterId, HeartbeatMessage};
use crate::storage::{Filter, QueueKind};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Outer request envelope: one per client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub id: EnvelopeId,
    pub payload: RequestPayload,
}

impl ProxyRequest {
    pub fn new(id: EnvelopeId, payload: RequestPayload) -> Self {
        Self { id, payload }
    }
}

/// Payload kinds a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestPayload {
    Init(InitRequest),
    Heartbeat(HeartbeatMessage),
    Message(TypedRequest),
}

/// Connection handshake. Must be the first non-heartbeat frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitRequest {
    /// Protocol the client speaks, e.g. `prism`.
    pub protocol: String,
    /// Highest protocol version the client supports.
    pub version: u32,
    /// Payload format name resolved against the server's format registry.
    pub format: String,
    /// Logical namespace qualifying every resource name on this connection.
    #[serde(default)]
    pub scope: String,
}

/// A typed request scoped to one sub-protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypedRequest {
    Cache {
        /// Target cache channel; 0 only for `EnsureCache`.
        channel_id: ChannelId,
        op: CacheOp,
    },
    Queue {
        /// Target queue channel; 0 only for `EnsureQueue`.
        channel_id: ChannelId,
        op: QueueOp,
    },
}

/// What a map-listener subscription selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerSelector {
    Key(Bytes),
    Filter(Filter),
}

/// Cache sub-protocol operations. Closed enumeration; every variant yields
/// zero or more result messages followed by exactly one terminal frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheOp {
    EnsureCache {
        name: String,
    },
    Get {
        key: Bytes,
    },
    GetAll {
        keys: Vec<Bytes>,
    },
    Put {
        key: Bytes,
        value: Bytes,
        /// Entry lifetime in milliseconds; absent means no expiry.
        ttl_millis: Option<u64>,
    },
    PutAll {
        entries: Vec<BinaryEntry>,
        ttl_millis: Option<u64>,
    },
    PutIfAbsent {
        key: Bytes,
        value: Bytes,
    },
    Remove {
        key: Bytes,
    },
    RemoveMapping {
        key: Bytes,
        value: Bytes,
    },
    Replace {
        key: Bytes,
        value: Bytes,
    },
    ReplaceMapping {
        key: Bytes,
        from: Bytes,
        to: Bytes,
    },
    ContainsKey {
        key: Bytes,
    },
    ContainsValue {
        value: Bytes,
    },
    ContainsEntry {
        key: Bytes,
        value: Bytes,
    },
    Clear,
    Truncate,
    Destroy,
    Size,
    IsEmpty,
    Index {
        add: bool,
        extractor: Bytes,
        sorted: bool,
        comparator: Option<Bytes>,
    },
    QueryKeys {
        filter: Option<Filter>,
        comparator: Option<Bytes>,
    },
    QueryEntries {
        filter: Option<Filter>,
        comparator: Option<Bytes>,
    },
    QueryValues {
        filter: Option<Filter>,
        comparator: Option<Bytes>,
    },
    Invoke {
        /// Entry agent bytes; required, validated before execution.
        agent: Bytes,
        keys: Vec<Bytes>,
        filter: Option<Filter>,
    },
    Aggregate {
        agent: Bytes,
        keys: Vec<Bytes>,
        filter: Option<Filter>,
    },
    MapListener {
        subscribe: bool,
        selector: ListenerSelector,
        /// Tag echoed on delivered events for filter subscriptions; absent
        /// subscriptions deliver untagged.
        filter_id: Option<FilterId>,
        /// Emit synthetic current-state events at subscribe time.
        priming: bool,
        /// Deliver events without old/new values.
        lite: bool,
        /// When present, install/remove a mutation interceptor instead of an
        /// event subscription.
        trigger: Option<Bytes>,
    },
}

/// Queue sub-protocol operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueOp {
    EnsureQueue { name: String, kind: QueueKind },
    PeekHead,
    PeekTail,
    PollHead,
    PollTail,
    OfferHead { value: Bytes },
    OfferTail { value: Bytes },
    IsReady,
    IsEmpty,
    Size,
    Clear,
    Destroy,
}
