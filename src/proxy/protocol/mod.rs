//! Wire protocol surface: envelopes, typed requests, responses, and events.

pub mod request;
pub mod response;
pub mod types;

pub use request::{
    CacheOp, InitRequest, ListenerSelector, ProxyRequest, QueueOp, RequestPayload, TypedRequest,
};
pub use response::{
    InitResponse, MapEvent, ProxyResponse, ResponsePayload, TypedResponse, EVENT_ENVELOPE_ID,
};
pub use types::{
    BinaryEntry, ChannelId, EnvelopeId, ErrorMessage, FilterId, HeartbeatMessage, OptionalValue,
};

/// Protocol name accepted at handshake.
pub const PROTOCOL_NAME: &str = "prism";

/// Highest multiplexed protocol version this server speaks.
pub const PROTOCOL_VERSION: u32 = 1;
