//! Runtime orchestration: wires the storage backend, format registry,
//! metrics, listeners, and shutdown fan-out.

use crate::core::config::Config;
use crate::core::time::Clock;
use crate::format::FormatRegistry;
use crate::net::{serve, ConnectionLimits, ServerContext};
use crate::ops::metrics::ProxyMetrics;
use crate::ops::telemetry::{self, LogHandle};
use crate::proxy::legacy::LegacyFacade;
use crate::proxy::session::{ProxySession, ServerIdentity};
use crate::proxy::protocol::ProxyResponse;
use crate::storage::{MemoryBackend, StorageBackend, StoreRegistry};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Process-wide runtime. One instance owns everything connections share.
pub struct Runtime<C: Clock> {
    config: Config,
    clock: C,
    stores: Arc<StoreRegistry>,
    formats: Arc<FormatRegistry>,
    metrics: Arc<ProxyMetrics>,
    identity: Arc<ServerIdentity>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    log_handle: Option<LogHandle>,
}

impl<C: Clock> Runtime<C> {
    pub fn new(config: Config, clock: C, log_handle: Option<LogHandle>) -> Result<Self> {
        Self::with_backend(config, clock, log_handle, Arc::new(MemoryBackend::default()))
    }

    pub fn with_backend(
        config: Config,
        clock: C,
        log_handle: Option<LogHandle>,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let identity = Arc::new(ServerIdentity::generate(config.proxy.member_id));
        Ok(Self {
            config,
            clock,
            stores: Arc::new(StoreRegistry::new(backend)),
            formats: Arc::new(FormatRegistry::default()),
            metrics: Arc::new(ProxyMetrics::default()),
            identity,
            shutdown_tx,
            shutdown_rx,
            log_handle,
        })
    }

    /// Serve until shutdown is requested.
    pub async fn run(&mut self) -> Result<()> {
        if let Some(bind) = self.config.telemetry.bind.clone() {
            telemetry::start_http(&bind, self.metrics.clone(), self.log_handle.clone()).await?;
        }
        let bind = self.config.listener.bind.clone();
        serve(&bind, self.server_context(), self.shutdown_rx.clone()).await
    }

    /// Signal every listener to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Open an in-process session bypassing the wire, sharing the runtime's
    /// stores and identity. Used by embedding hosts and the test suites.
    pub fn open_session(
        &self,
    ) -> (Arc<ProxySession>, mpsc::UnboundedReceiver<ProxyResponse>) {
        ProxySession::open(
            self.stores.clone(),
            self.formats.clone(),
            self.metrics.clone(),
            self.identity.clone(),
        )
    }

    /// Legacy unary facade over the same stores.
    pub fn legacy_facade(&self) -> LegacyFacade {
        LegacyFacade::new(
            self.stores.clone(),
            self.metrics.clone(),
            self.config.proxy.transfer_threshold,
        )
    }

    pub fn metrics(&self) -> &Arc<ProxyMetrics> {
        &self.metrics
    }

    pub fn stores(&self) -> &Arc<StoreRegistry> {
        &self.stores
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn server_context(&self) -> ServerContext<C> {
        ServerContext {
            stores: self.stores.clone(),
            formats: self.formats.clone(),
            metrics: self.metrics.clone(),
            identity: self.identity.clone(),
            limits: ConnectionLimits {
                max_frame_bytes: self.config.proxy.max_frame_bytes,
                idle_timeout: self.config.idle_timeout(),
            },
            clock: self.clock.clone(),
        }
    }
}
