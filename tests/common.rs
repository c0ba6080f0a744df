//! Shared test harness: an in-process cluster with handshaken connections.

#![allow(dead_code)]

use bytes::Bytes;
use prism::core::config::Config;
use prism::core::runtime::Runtime;
use prism::core::time::SystemClock;
use prism::proxy::protocol::{
    CacheOp, ChannelId, EnvelopeId, ErrorMessage, InitRequest, OptionalValue, ProxyRequest,
    ProxyResponse, QueueOp, RequestPayload, ResponsePayload, TypedRequest, TypedResponse,
    PROTOCOL_NAME, PROTOCOL_VERSION,
};
use prism::proxy::session::ProxySession;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub fn b(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

pub struct TestCluster {
    pub runtime: Runtime<SystemClock>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self {
            runtime: Runtime::new(Config::default(), SystemClock, None).unwrap(),
        }
    }

    /// Open a connection and complete the handshake.
    pub async fn connect(&self) -> TestConnection {
        self.connect_scoped("test").await
    }

    pub async fn connect_scoped(&self, scope: &str) -> TestConnection {
        self.connect_with_format(scope, "passthrough").await
    }

    pub async fn connect_with_format(&self, scope: &str, format: &str) -> TestConnection {
        let (session, rx) = self.runtime.open_session();
        let mut conn = TestConnection {
            session,
            rx,
            pending: VecDeque::new(),
            next_id: 0,
        };
        let id = conn.send(RequestPayload::Init(InitRequest {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION,
            format: format.to_string(),
            scope: scope.to_string(),
        }));
        let frame = conn.recv_frame().await;
        assert_eq!(frame.id, id);
        assert!(
            matches!(frame.payload, ResponsePayload::Init(_)),
            "handshake failed: {frame:?}"
        );
        conn
    }
}

pub struct TestConnection {
    pub session: Arc<ProxySession>,
    pub rx: mpsc::UnboundedReceiver<ProxyResponse>,
    pending: VecDeque<ProxyResponse>,
    next_id: EnvelopeId,
}

impl TestConnection {
    /// Send one frame; panics if the session reports a fatal error.
    pub fn send(&mut self, payload: RequestPayload) -> EnvelopeId {
        self.next_id += 1;
        let id = self.next_id;
        self.session
            .accept(ProxyRequest::new(id, payload))
            .expect("unexpected connection-fatal error");
        id
    }

    /// Send one frame expecting the session to declare it fatal.
    pub fn send_expect_fatal(&mut self, payload: RequestPayload) -> EnvelopeId {
        self.next_id += 1;
        let id = self.next_id;
        assert!(
            self.session.accept(ProxyRequest::new(id, payload)).is_err(),
            "expected a connection-fatal error"
        );
        id
    }

    pub fn cache_request(&mut self, channel_id: ChannelId, op: CacheOp) -> EnvelopeId {
        self.send(RequestPayload::Message(TypedRequest::Cache {
            channel_id,
            op,
        }))
    }

    pub fn queue_request(&mut self, channel_id: ChannelId, op: QueueOp) -> EnvelopeId {
        self.send(RequestPayload::Message(TypedRequest::Queue {
            channel_id,
            op,
        }))
    }

    /// Next frame from the wire, regardless of id.
    pub async fn recv_frame(&mut self) -> ProxyResponse {
        if let Some(frame) = self.pending.pop_front() {
            return frame;
        }
        tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("outbox closed")
    }

    /// Result messages for one request id, up to its Complete marker.
    pub async fn collect(&mut self, id: EnvelopeId) -> Result<Vec<TypedResponse>, ErrorMessage> {
        let mut messages = Vec::new();
        // Serve buffered frames first so interleaved collections compose.
        let mut index = 0;
        while index < self.pending.len() {
            if self.pending[index].id == id {
                let frame = self.pending.remove(index).unwrap();
                if let Some(result) = Self::fold(&mut messages, frame) {
                    return result.map(|()| messages);
                }
            } else {
                index += 1;
            }
        }
        loop {
            let frame = if let Some(frame) = self.pending.pop_front() {
                frame
            } else {
                tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
                    .await
                    .expect("timed out waiting for a frame")
                    .expect("outbox closed")
            };
            if frame.id != id {
                self.pending.push_back(frame);
                continue;
            }
            if let Some(result) = Self::fold(&mut messages, frame) {
                return result.map(|()| messages);
            }
        }
    }

    fn fold(
        messages: &mut Vec<TypedResponse>,
        frame: ProxyResponse,
    ) -> Option<Result<(), ErrorMessage>> {
        match frame.payload {
            ResponsePayload::Message(message) => {
                messages.push(message);
                None
            }
            ResponsePayload::Complete => Some(Ok(())),
            ResponsePayload::Error(error) => Some(Err(error)),
            other => panic!("unexpected frame while collecting: {other:?}"),
        }
    }

    pub async fn expect_complete(&mut self, id: EnvelopeId) -> Vec<TypedResponse> {
        self.collect(id)
            .await
            .unwrap_or_else(|error| panic!("request {id} failed: {error:?}"))
    }

    pub async fn expect_error(&mut self, id: EnvelopeId) -> ErrorMessage {
        match self.collect(id).await {
            Ok(messages) => panic!("request {id} unexpectedly completed: {messages:?}"),
            Err(error) => error,
        }
    }

    /// Next unsolicited push (envelope id 0).
    pub async fn next_event(&mut self) -> TypedResponse {
        if let Some(position) = self.pending.iter().position(|frame| frame.id == 0) {
            let frame = self.pending.remove(position).unwrap();
            match frame.payload {
                ResponsePayload::Message(message) => return message,
                other => panic!("unexpected push payload: {other:?}"),
            }
        }
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
                .await
                .expect("timed out waiting for a push")
                .expect("outbox closed");
            if frame.id == 0 {
                match frame.payload {
                    ResponsePayload::Message(message) => return message,
                    other => panic!("unexpected push payload: {other:?}"),
                }
            }
            self.pending.push_back(frame);
        }
    }

    /// True when no push is buffered and none arrives within a short grace
    /// period.
    pub async fn no_event_within(&mut self, grace: Duration) -> bool {
        if self.pending.iter().any(|frame| frame.id == 0) {
            return false;
        }
        match tokio::time::timeout(grace, self.rx.recv()).await {
            Err(_) => true,
            Ok(None) => true,
            Ok(Some(frame)) => {
                let is_push = frame.id == 0;
                self.pending.push_back(frame);
                !is_push
            }
        }
    }

    // -- convenience wrappers -------------------------------------------------

    pub async fn ensure_cache(&mut self, name: &str) -> ChannelId {
        let id = self.cache_request(
            0,
            CacheOp::EnsureCache {
                name: name.to_string(),
            },
        );
        match self.expect_complete(id).await.as_slice() {
            [TypedResponse::ChannelId { channel_id }] => *channel_id,
            other => panic!("unexpected ensure result: {other:?}"),
        }
    }

    pub async fn put(&mut self, channel: ChannelId, key: &str, value: &str) -> OptionalValue {
        let id = self.cache_request(
            channel,
            CacheOp::Put {
                key: b(key),
                value: b(value),
                ttl_millis: None,
            },
        );
        match self.expect_complete(id).await.as_slice() {
            [TypedResponse::Value(value)] => value.clone(),
            other => panic!("unexpected put result: {other:?}"),
        }
    }

    pub async fn get(&mut self, channel: ChannelId, key: &str) -> OptionalValue {
        let id = self.cache_request(channel, CacheOp::Get { key: b(key) });
        match self.expect_complete(id).await.as_slice() {
            [TypedResponse::Value(value)] => value.clone(),
            other => panic!("unexpected get result: {other:?}"),
        }
    }

    pub async fn size(&mut self, channel: ChannelId) -> i64 {
        let id = self.cache_request(channel, CacheOp::Size);
        match self.expect_complete(id).await.as_slice() {
            [TypedResponse::Count { value }] => *value,
            other => panic!("unexpected size result: {other:?}"),
        }
    }
}
