//! Shared wire types used by both envelope directions.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Envelope correlation id. Caller-assigned, unique per outstanding request
/// on a connection. Id 0 is reserved for unsolicited server pushes.
pub type EnvelopeId = i64;

/// Per-connection channel handle for one ensured cache or queue. Zero is
/// reserved and never allocated.
pub type ChannelId = i32;

/// Client-assigned tag demultiplexing filter subscriptions on one channel.
pub type FilterId = i64;

/// A value that distinguishes "present but empty/null" from "absent".
/// Absence is always signalled through the flag, never a sentinel value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionalValue {
    pub present: bool,
    pub value: Bytes,
}

impl OptionalValue {
    pub fn absent() -> Self {
        Self {
            present: false,
            value: Bytes::new(),
        }
    }

    pub fn of(value: Bytes) -> Self {
        Self {
            present: true,
            value,
        }
    }

    pub fn from_option(value: Option<Bytes>) -> Self {
        match value {
            Some(value) => Self::of(value),
            None => Self::absent(),
        }
    }

    pub fn into_option(self) -> Option<Bytes> {
        if self.present {
            Some(self.value)
        } else {
            None
        }
    }
}

/// One key/value pair in a bulk request or a streamed result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryEntry {
    pub key: Bytes,
    pub value: Bytes,
}

impl BinaryEntry {
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// Terminal failure frame for one request id. `cause` carries an encoded
/// server-side detail when one is available, usable for programmatic
/// matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Bytes>,
}

/// Keep-alive message, valid in both directions at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub ack: bool,
}
