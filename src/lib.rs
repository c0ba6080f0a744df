// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Function complexity: protocol dispatch is inherently branchy
#![allow(clippy::too_many_lines)]
#![allow(clippy::too_many_arguments)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
// Numeric casts: intentional in protocol code
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
// Large types
#![allow(clippy::large_enum_variant)]

//! Prism - multiplexed proxy for named caches and queues.
//!
//! One bidirectional stream per connection multiplexes independent logical
//! conversations ("channels") against named caches and queues: synchronous
//! request/response calls interleave with unsolicited push events and
//! periodic liveness heartbeats.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//! - `core::runtime` - Runtime orchestration
//! - `core::time` - Deterministic time utilities
//!
//! ## Protocol
//! - `proxy::protocol` - Envelope and typed message shapes
//! - `proxy::session` - Per-connection state machine and dispatch
//! - `proxy::registry` - Channel id allocation
//! - `proxy::cache` - Cache sub-protocol engine
//! - `proxy::queue` - Queue sub-protocol engine
//! - `proxy::events` - Subscription table and event delivery
//! - `proxy::paging` - Legacy page-cursor iteration
//! - `proxy::legacy` - Protocol-v0 unary facade
//!
//! ## Collaborators
//! - `storage` - Storage contracts and the in-memory backend
//! - `format` - Named opaque payload formats
//!
//! ## Networking
//! - `net::frame` - Length-prefixed framing
//! - `net::server` - TCP listener and connection plumbing
//!
//! ## Operations
//! - `ops::metrics` - Read-only counters
//! - `ops::telemetry` - Logging and the management endpoint

// Core infrastructure
pub mod core;

// Protocol engines
pub mod proxy;

// Collaborator seams
pub mod format;
pub mod storage;

// Networking
pub mod net;

// Operations
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, runtime, time};
pub use ops::{metrics, telemetry};
pub use proxy::{events, legacy, paging, protocol, registry, session};
