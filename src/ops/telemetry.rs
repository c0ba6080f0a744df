//! Logging initialization and the read-only management endpoint.
//!
//! The HTTP surface is a passive observer: counters, liveness, and a
//! log-level reload hook. Nothing served here can affect protocol behavior.

use crate::ops::metrics::ProxyMetrics;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::reload;

pub type LogHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Initialize JSON logging with a reloadable level filter.
pub fn init_tracing(log_level: Option<&str>) -> Result<LogHandle> {
    let level = log_level.unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(filter);
    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init tracing: {e}"))?;
    Ok(handle)
}

/// Start a minimal HTTP endpoint serving metrics, health, and loglevel
/// controls.
pub async fn start_http(
    bind: &str,
    metrics: Arc<ProxyMetrics>,
    log_handle: Option<LogHandle>,
) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind telemetry endpoint on {bind}"))?;
    tracing::info!("telemetry endpoint listening on {}", bind);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, addr)) => {
                    let metrics = metrics.clone();
                    let log_handle = log_handle.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_conn(&mut socket, addr, metrics, log_handle).await
                        {
                            tracing::warn!("telemetry handler error: {err:?}");
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!("telemetry accept error: {err:?}");
                }
            }
        }
    });
    Ok(())
}

async fn handle_conn(
    socket: &mut tokio::net::TcpStream,
    _addr: SocketAddr,
    metrics: Arc<ProxyMetrics>,
    log_handle: Option<LogHandle>,
) -> Result<()> {
    let mut buf = [0u8; 4096];
    let n = socket.read(&mut buf).await?;
    let req = String::from_utf8_lossy(&buf[..n]);
    let first = req.lines().next().unwrap_or("");
    let path = first
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .split('?')
        .collect::<Vec<_>>();
    let route = path[0];
    let query = if path.len() > 1 { path[1] } else { "" };
    let (status, body, content_type) = match route {
        "/metrics" => (200, metrics.render(), "text/plain"),
        "/readyz" => (200, "{\"ready\":true}".to_string(), "application/json"),
        "/livez" => (200, "{\"live\":true}".to_string(), "application/json"),
        "/v1/loglevel" => {
            if let Some(handle) = log_handle {
                if let Some(level) = query.strip_prefix("level=") {
                    if let Ok(filter) = EnvFilter::try_new(level) {
                        let _ = handle.modify(|f| *f = filter);
                    }
                }
            }
            (200, "{\"status\":\"ok\"}".to_string(), "application/json")
        }
        _ => (404, "not found".to_string(), "text/plain"),
    };
    let resp = format!(
        "HTTP/1.1 {} OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    socket.write_all(resp.as_bytes()).await?;
    Ok(())
}
