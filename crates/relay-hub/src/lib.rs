//! relay-hub library crate.
//!
//! This crate provides the WebSocket hub that connects phones streaming their
//! screens ("producers") to control panels that watch them and send input
//! back ("observers").
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Phones (JSON + binary over WebSocket)     Panels (JSON over WebSocket)
//!                      ↕                              ↕
//! [relay-hub]
//!   ├── domain/           Pure types: HubConfig, FanoutPolicy
//!   ├── application/      Router, liveness monitor, connection table
//!   └── infrastructure/
//!         ├── handshake/  Role and deviceId from the upgrade request
//!         ├── config_file/ Optional TOML configuration
//!         └── ws_server/  WebSocket accept loop (tokio-tungstenite)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async code.
//! - `application` depends on `domain` and `relay-core`, plus `tokio` channels,
//!   mutexes and timers.
//! - `infrastructure` depends on all other layers plus sockets and files.
//!
//! # For beginners: why this structure?
//!
//! Routing rules are the interesting, bug-prone part of the hub.  Keeping them
//! in the application layer, reachable through plain channels, means every
//! rule can be tested without opening a socket.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: routing and liveness.
pub mod application;

/// Infrastructure layer: WebSocket server, handshake parsing, config file.
pub mod infrastructure;
