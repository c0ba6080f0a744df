//! Outbound envelope and typed result/event messages.
//!
//! For each request id the server writes zero or more `Message` frames and
//! exactly one terminal frame (`Complete` or `Error`). Unsolicited pushes
//! (map events, lifecycle broadcasts) ride the same stream under the
//! reserved envelope id 0 and never terminate.

use super::types::{
    BinaryEntry, ChannelId, EnvelopeId, ErrorMessage, FilterId, HeartbeatMessage, OptionalValue,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope id carried by every unsolicited push.
pub const EVENT_ENVELOPE_ID: EnvelopeId = 0;

/// Outer response envelope: one per server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub id: EnvelopeId,
    pub payload: ResponsePayload,
}

impl ProxyResponse {
    pub fn new(id: EnvelopeId, payload: ResponsePayload) -> Self {
        Self { id, payload }
    }

    /// Wrap an unsolicited push message.
    pub fn event(message: TypedResponse) -> Self {
        Self::new(EVENT_ENVELOPE_ID, ResponsePayload::Message(message))
    }
}

/// Payload kinds the server may write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponsePayload {
    Init(InitResponse),
    Heartbeat(HeartbeatMessage),
    Message(TypedResponse),
    Complete,
    Error(ErrorMessage),
}

/// Handshake result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResponse {
    /// Version the server settled on: min(client requested, supported).
    pub version: u32,
    pub server_uuid: Uuid,
    pub server_version: String,
    pub member_id: u32,
    pub member_uuid: Uuid,
}

/// Typed result or push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypedResponse {
    /// Channel allocation result for an ensure request.
    ChannelId { channel_id: ChannelId },
    /// Point-operation result with an explicit presence flag.
    Value(OptionalValue),
    /// Boolean result (contains, offer, replace-mapping and friends).
    Flag { value: bool },
    /// Numeric result (size).
    Count { value: i64 },
    /// One streamed key.
    Key { key: Bytes },
    /// One streamed entry.
    Entry(BinaryEntry),
    /// Subscribe/unsubscribe acknowledgment.
    ListenerAck { subscribed: bool, uid: i64 },
    /// One map event push.
    Event(MapEvent),
    /// Channel lifecycle broadcast: the backing cache was truncated.
    Truncated { channel_id: ChannelId },
    /// Channel lifecycle broadcast: the backing cache was destroyed.
    Destroyed { channel_id: ChannelId },
}

/// Mutation notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEvent {
    pub channel_id: ChannelId,
    /// Every tagged filter subscription matched by this mutation; empty for
    /// keyed and untagged-filter deliveries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_ids: Vec<FilterId>,
    pub key: Bytes,
    pub old_value: OptionalValue,
    pub new_value: OptionalValue,
    /// Not caused by a direct client mutation.
    pub synthetic: bool,
    /// Emitted as part of a priming subscription's current-state replay.
    pub priming: bool,
    /// The entry was removed because its time-to-live elapsed.
    pub expired: bool,
    /// An installed trigger altered the written value.
    pub transformed: bool,
}
