//! Framed TCP surface for the multiplexed protocol.
//!
//! The transport stays dumb on purpose: it reads envelopes off the wire and
//! feeds them to the session, and drains the session outbox back onto the
//! wire. Everything protocol-shaped lives in `proxy::session`. A connection
//! that stays silent past the idle deadline is closed; a frame that fails
//! envelope decoding is connection-fatal.

use crate::core::time::Clock;
use crate::format::FormatRegistry;
use crate::net::frame::{read_frame, write_frame};
use crate::ops::metrics::ProxyMetrics;
use crate::proxy::protocol::ProxyRequest;
use crate::proxy::session::{ProxySession, ServerIdentity};
use crate::storage::StoreRegistry;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Connection-scoped transport limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_frame_bytes: usize,
    pub idle_timeout: Duration,
}

/// Everything a connection needs from the process.
#[derive(Clone)]
pub struct ServerContext<C: Clock> {
    pub stores: Arc<StoreRegistry>,
    pub formats: Arc<FormatRegistry>,
    pub metrics: Arc<ProxyMetrics>,
    pub identity: Arc<ServerIdentity>,
    pub limits: ConnectionLimits,
    pub clock: C,
}

/// Accept connections until shutdown is signalled.
pub async fn serve<C: Clock>(
    bind: &str,
    context: ServerContext<C>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind proxy listener on {bind}"))?;
    tracing::info!("proxy listener on {}", bind);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("proxy listener shutting down");
                    return Ok(());
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        let context = context.clone();
                        tokio::spawn(async move {
                            tracing::debug!(%peer, "connection opened");
                            if let Err(err) = handle_conn(socket, context).await {
                                tracing::warn!(%peer, "connection error: {err:?}");
                            }
                            tracing::debug!(%peer, "connection closed");
                        });
                    }
                    Err(err) => {
                        tracing::warn!("accept error: {err:?}");
                    }
                }
            }
        }
    }
}

async fn handle_conn<C: Clock>(socket: TcpStream, context: ServerContext<C>) -> Result<()> {
    let (mut read_half, mut write_half) = socket.into_split();
    let (session, mut outbox_rx) = ProxySession::open(
        context.stores,
        context.formats,
        context.metrics,
        context.identity,
    );

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            let body = match serde_json::to_vec(&frame) {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!("response encoding failed: {err}");
                    break;
                }
            };
            if write_frame(&mut write_half, &body).await.is_err() {
                break;
            }
        }
    });

    loop {
        // Each frame rearms the idle deadline; heartbeats are enough to keep
        // a quiet connection alive.
        let read = tokio::select! {
            () = context.clock.sleep(context.limits.idle_timeout) => {
                tracing::debug!("closing idle connection");
                break;
            }
            read = read_frame(&mut read_half, context.limits.max_frame_bytes) => read,
        };
        match read {
            Err(err) => {
                tracing::warn!("frame read failed: {err}");
                break;
            }
            // Client completed its half of the stream; nothing more is owed.
            Ok(None) => break,
            Ok(Some(body)) => {
                let request: ProxyRequest = match serde_json::from_slice(&body) {
                    Ok(request) => request,
                    Err(err) => {
                        tracing::warn!("malformed envelope: {err}");
                        break;
                    }
                };
                if session.accept(request).is_err() {
                    break;
                }
            }
        }
    }

    session.close();
    drop(session);
    // The writer drains remaining frames and ends once every outbox handle
    // (per-request tasks, subscription manager) is gone.
    let _ = writer.await;
    Ok(())
}
