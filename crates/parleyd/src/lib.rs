//! Parley relay server: presence roster and call-signaling over WebSocket.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Error types for relay server operations.
pub mod error;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
mod ratelimit;
/// Connected participants, their status, and roster broadcast.
pub mod registry;
/// Routing of signaling messages between participants.
pub mod relay;
/// Accept loop and shared server state.
pub mod server;

pub use server::{run, run_with_shutdown, ServerState};
