//! Infrastructure layer for relay-hub.
//!
//! The infrastructure layer handles all I/O: accepting WebSocket connections,
//! reading connection parameters from the upgrade request, and loading the
//! optional config file.
//!
//! # Responsibilities
//!
//! - Binding a TCP listener for WebSocket connections
//! - Performing the WebSocket HTTP upgrade handshake
//! - Spawning per-connection Tokio tasks
//! - Handling the graceful shutdown signal
//! - Reading `relay-hub.toml`
//!
//! # What does NOT belong here?
//!
//! - Routing decisions (that is the application layer)
//! - Session and message types (those live in `relay-core`)

pub mod config_file;
pub mod handshake;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use config_file::{ConfigFile, ConfigFileError};
pub use handshake::{ConnectionParams, HandshakeError};
pub use ws_server::{bind_listener, run_server, serve};
