//! Proxy session controller.
//!
//! One instance per connection. Gates all traffic on the Init handshake,
//! answers heartbeats at any time, and dispatches typed requests to the
//! cache/queue engines on their own tasks so a slow streaming request never
//! stalls an unrelated channel.
//!
//! All frames leave through one unbounded outbox: per-request tasks write
//! their result messages and terminal frame in order, while the subscription
//! manager interleaves unsolicited pushes under the reserved envelope id.
//! The transport layer owns the read loop and drains the outbox to the wire.

use crate::format::FormatRegistry;
use crate::ops::metrics::ProxyMetrics;
use crate::proxy::cache::CacheEngine;
use crate::proxy::error::{ProxyError, ProxyResult};
use crate::proxy::events::SubscriptionManager;
use crate::proxy::protocol::{
    EnvelopeId, InitRequest, InitResponse, ProxyRequest, ProxyResponse, RequestPayload,
    ResponsePayload, TypedRequest, TypedResponse, EVENT_ENVELOPE_ID, PROTOCOL_NAME,
    PROTOCOL_VERSION,
};
use crate::proxy::queue::QueueEngine;
use crate::proxy::registry::ChannelRegistry;
use crate::storage::StoreRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identity material echoed in every handshake response.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub server_uuid: Uuid,
    pub member_uuid: Uuid,
    pub member_id: u32,
    pub server_version: String,
}

impl ServerIdentity {
    pub fn generate(member_id: u32) -> Self {
        Self {
            server_uuid: Uuid::new_v4(),
            member_uuid: Uuid::new_v4(),
            member_id,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Shared handle for writing response frames.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<ProxyResponse>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProxyResponse>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, id: EnvelopeId, payload: ResponsePayload) {
        // A closed receiver means the connection is gone; frames are moot.
        let _ = self.tx.send(ProxyResponse::new(id, payload));
    }

    /// Write an unsolicited push under the reserved envelope id.
    pub fn push_event(&self, message: TypedResponse) {
        let _ = self.tx.send(ProxyResponse::event(message));
    }
}

/// Ordered response stream for one request id: zero or more messages, then
/// exactly one terminal frame.
pub struct RequestStream {
    id: EnvelopeId,
    outbox: Outbox,
}

impl RequestStream {
    pub fn new(id: EnvelopeId, outbox: Outbox) -> Self {
        Self { id, outbox }
    }

    pub fn message(&self, message: TypedResponse) {
        self.outbox.send(self.id, ResponsePayload::Message(message));
    }

    pub fn complete(&self) {
        self.outbox.send(self.id, ResponsePayload::Complete);
    }

    pub fn error(&self, err: &ProxyError) {
        self.outbox
            .send(self.id, ResponsePayload::Error(err.to_message()));
    }
}

/// Engines and negotiated parameters live only after a successful handshake.
struct ConnectionState {
    scope: String,
    version: u32,
    cache: CacheEngine,
    queue: QueueEngine,
}

enum SessionPhase {
    AwaitingInit,
    Ready(Arc<ConnectionState>),
    Closed,
}

/// Per-connection protocol state machine: AwaitingInit -> Ready -> Closed.
pub struct ProxySession {
    phase: Mutex<SessionPhase>,
    outbox: Outbox,
    stores: Arc<StoreRegistry>,
    formats: Arc<FormatRegistry>,
    metrics: Arc<ProxyMetrics>,
    identity: Arc<ServerIdentity>,
    registry: Arc<ChannelRegistry>,
    subscriptions: Arc<SubscriptionManager>,
}

impl ProxySession {
    /// Open a session and hand back the frame receiver the transport drains.
    pub fn open(
        stores: Arc<StoreRegistry>,
        formats: Arc<FormatRegistry>,
        metrics: Arc<ProxyMetrics>,
        identity: Arc<ServerIdentity>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ProxyResponse>) {
        let (outbox, rx) = Outbox::channel();
        metrics.connection_opened();
        let subscriptions = Arc::new(SubscriptionManager::new(outbox.clone(), metrics.clone()));
        let session = Arc::new(Self {
            phase: Mutex::new(SessionPhase::AwaitingInit),
            outbox,
            stores,
            formats,
            metrics,
            identity,
            registry: Arc::new(ChannelRegistry::new()),
            subscriptions,
        });
        (session, rx)
    }

    /// Feed one inbound frame through the state machine.
    ///
    /// A returned error is connection-fatal; the offending frame has already
    /// been answered with a terminal Error frame where one applies, so the
    /// caller only needs to stop reading. Request-scoped failures are framed
    /// internally and do not surface here.
    pub fn accept(self: &Arc<Self>, request: ProxyRequest) -> ProxyResult<()> {
        let ProxyRequest { id, payload } = request;
        match payload {
            RequestPayload::Heartbeat(heartbeat) => {
                // Keep-alive traffic bypasses the handshake gate entirely.
                self.metrics.heartbeat_seen();
                self.outbox.send(id, ResponsePayload::Heartbeat(heartbeat));
                Ok(())
            }
            // Id 0 is reserved for pushes; reject the request, keep the
            // connection.
            _ if id == EVENT_ENVELOPE_ID => {
                self.metrics.error_seen();
                self.outbox.send(
                    id,
                    ResponsePayload::Error(
                        ProxyError::Invalid("request id 0 is reserved".to_string()).to_message(),
                    ),
                );
                Ok(())
            }
            RequestPayload::Init(init) => self.handle_init(id, init),
            RequestPayload::Message(typed) => self.dispatch(id, typed),
        }
    }

    /// Release every resource tied to this connection. Idempotent; invoked
    /// by the transport on stream close and by the fatal-error path.
    pub fn close(&self) {
        {
            let mut phase = self.phase.lock();
            if matches!(*phase, SessionPhase::Closed) {
                return;
            }
            *phase = SessionPhase::Closed;
        }
        self.subscriptions.shutdown();
        self.metrics.connection_closed();
    }

    fn handle_init(&self, id: EnvelopeId, init: InitRequest) -> ProxyResult<()> {
        {
            let phase = self.phase.lock();
            match *phase {
                SessionPhase::AwaitingInit => {}
                SessionPhase::Ready(_) => {
                    drop(phase);
                    return Err(self.fail_connection(
                        id,
                        ProxyError::Violation("duplicate init on established connection".into()),
                    ));
                }
                SessionPhase::Closed => {
                    return Err(ProxyError::Violation("connection closed".into()));
                }
            }
        }
        if init.protocol != PROTOCOL_NAME {
            return Err(self.fail_connection(
                id,
                ProxyError::Violation(format!("unsupported protocol `{}`", init.protocol)),
            ));
        }
        let format = match self.formats.lookup(&init.format) {
            Ok(format) => format,
            Err(err) => return Err(self.fail_connection(id, ProxyError::Decode(err))),
        };
        tracing::debug!(
            scope = %init.scope,
            format = format.name(),
            "proxy connection initialized"
        );
        let version = init.version.min(PROTOCOL_VERSION);
        let state = Arc::new(ConnectionState {
            scope: init.scope.clone(),
            version,
            cache: CacheEngine::new(
                init.scope.clone(),
                self.stores.clone(),
                self.registry.clone(),
                self.subscriptions.clone(),
                format.clone(),
                self.metrics.clone(),
            ),
            queue: QueueEngine::new(
                init.scope,
                self.stores.clone(),
                self.registry.clone(),
                format,
                self.metrics.clone(),
            ),
        });
        *self.phase.lock() = SessionPhase::Ready(state);
        self.outbox.send(
            id,
            ResponsePayload::Init(InitResponse {
                version,
                server_uuid: self.identity.server_uuid,
                server_version: self.identity.server_version.clone(),
                member_id: self.identity.member_id,
                member_uuid: self.identity.member_uuid,
            }),
        );
        Ok(())
    }

    fn dispatch(self: &Arc<Self>, id: EnvelopeId, typed: TypedRequest) -> ProxyResult<()> {
        let state = {
            let phase = self.phase.lock();
            match &*phase {
                SessionPhase::Ready(state) => state.clone(),
                SessionPhase::AwaitingInit => {
                    drop(phase);
                    return Err(self.fail_connection(
                        id,
                        ProxyError::Violation("typed request received before init".into()),
                    ));
                }
                SessionPhase::Closed => {
                    return Err(ProxyError::Violation("connection closed".into()));
                }
            }
        };
        // One task per request: unrelated channels never block each other,
        // while this request's frames stay ordered on the shared outbox.
        let session = self.clone();
        tokio::spawn(async move {
            let stream = RequestStream::new(id, session.outbox.clone());
            let result = match typed {
                TypedRequest::Cache { channel_id, op } => {
                    state.cache.execute(channel_id, op, &stream)
                }
                TypedRequest::Queue { channel_id, op } => {
                    state.queue.execute(channel_id, op, &stream)
                }
            };
            match result {
                Ok(()) => stream.complete(),
                Err(err) => {
                    session.metrics.error_seen();
                    tracing::debug!(request = id, error = %err, "request failed");
                    stream.error(&err);
                }
            }
        });
        Ok(())
    }

    fn fail_connection(&self, id: EnvelopeId, err: ProxyError) -> ProxyError {
        self.metrics.error_seen();
        self.outbox
            .send(id, ResponsePayload::Error(err.to_message()));
        self.close();
        err
    }

    /// Negotiated scope, once ready. Mainly useful to transports and tests.
    pub fn scope(&self) -> Option<String> {
        match &*self.phase.lock() {
            SessionPhase::Ready(state) => Some(state.scope.clone()),
            _ => None,
        }
    }

    /// Negotiated protocol version, once ready.
    pub fn version(&self) -> Option<u32> {
        match &*self.phase.lock() {
            SessionPhase::Ready(state) => Some(state.version),
            _ => None,
        }
    }
}

impl Drop for ProxySession {
    fn drop(&mut self) {
        self.close();
    }
}
