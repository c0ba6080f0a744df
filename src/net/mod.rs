//! Wire transport: framing and the TCP listener.

pub mod frame;
pub mod server;

pub use server::{serve, ConnectionLimits, ServerContext};
