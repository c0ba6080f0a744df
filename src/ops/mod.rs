//! Operational surfaces: counters and telemetry plumbing.

pub mod metrics;
pub mod telemetry;

pub use metrics::ProxyMetrics;
