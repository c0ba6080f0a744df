//! Read-only proxy counters for the management surface.
//!
//! Passive observers only: nothing here feeds back into protocol behavior.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ProxyMetrics {
    connections_opened: AtomicU64,
    connections_active: AtomicU64,
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    heartbeats_total: AtomicU64,
    events_delivered: AtomicU64,
    subscriptions_active: AtomicU64,
}

impl ProxyMetrics {
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn request_seen(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error_seen(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_seen(&self) {
        self.heartbeats_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_opened(&self) {
        self.subscriptions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_closed(&self) {
        let _ = self
            .subscriptions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn active_subscriptions(&self) -> u64 {
        self.subscriptions_active.load(Ordering::Relaxed)
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Render the counter block in plain text exposition format.
    pub fn render(&self) -> String {
        format!(
            "prism_connections_opened_total {}\n\
             prism_connections_active {}\n\
             prism_requests_total {}\n\
             prism_errors_total {}\n\
             prism_heartbeats_total {}\n\
             prism_events_delivered_total {}\n\
             prism_subscriptions_active {}\n",
            self.connections_opened.load(Ordering::Relaxed),
            self.connections_active.load(Ordering::Relaxed),
            self.requests_total.load(Ordering::Relaxed),
            self.errors_total.load(Ordering::Relaxed),
            self.heartbeats_total.load(Ordering::Relaxed),
            self.events_delivered.load(Ordering::Relaxed),
            self.subscriptions_active.load(Ordering::Relaxed),
        )
    }
}
