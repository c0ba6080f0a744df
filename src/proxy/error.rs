//! Proxy failure taxonomy.
//!
//! Two blast radii exist: `Violation` tears down the whole connection
//! (pre-handshake traffic, handshake failures); every other variant is
//! scoped to the request id that caused it and leaves the connection, other
//! in-flight requests, and subscriptions untouched.

use crate::format::FormatError;
use crate::proxy::protocol::{ChannelId, ErrorMessage};
use crate::storage::StoreError;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Connection-fatal protocol violation.
    #[error("protocol violation: {0}")]
    Violation(String),
    /// Request addressed a channel id this connection never ensured.
    #[error("unknown channel id {0}")]
    UnknownChannel(ChannelId),
    /// Request addressed a channel whose resource was destroyed.
    #[error("channel {0} is no longer usable: resource destroyed")]
    ChannelDestroyed(ChannelId),
    /// Request failed validation (missing agent, bad priming filter, ...).
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Payload could not be decoded in the negotiated format.
    #[error("payload decode failed: {0}")]
    Decode(#[from] FormatError),
    /// The storage collaborator failed, timed out, or rejected the call.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl ProxyError {
    /// Whether this failure terminates the whole connection rather than a
    /// single request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProxyError::Violation(_))
    }

    /// Render the terminal error frame for this failure. Collaborator
    /// failures carry their detail as an encoded cause so clients can match
    /// on it programmatically.
    pub fn to_message(&self) -> ErrorMessage {
        let cause = match self {
            ProxyError::Store(err) => Some(Bytes::from(err.to_string().into_bytes())),
            ProxyError::Decode(err) => Some(Bytes::from(err.to_string().into_bytes())),
            _ => None,
        };
        ErrorMessage {
            message: self.to_string(),
            cause,
        }
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_violations_are_fatal() {
        assert!(ProxyError::Violation("message before init".into()).is_fatal());
        assert!(!ProxyError::UnknownChannel(5).is_fatal());
        assert!(!ProxyError::Invalid("missing agent".into()).is_fatal());
        assert!(!ProxyError::Store(StoreError::Timeout).is_fatal());
    }

    #[test]
    fn store_failures_carry_a_cause() {
        let err = ProxyError::Store(StoreError::Unavailable("partition offline".into()));
        let message = err.to_message();
        assert!(message.cause.is_some());
        assert!(message.message.contains("partition offline"));
    }
}
