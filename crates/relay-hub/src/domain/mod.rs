//! Domain layer for relay-hub.
//!
//! The hub's core entities (sessions, subscriptions, messages) live in
//! `relay-core`.  What remains here is the hub's own runtime configuration,
//! which is still pure data: no I/O, no environment reads.

pub mod config;

pub use config::{ConfigError, FanoutPolicy, HubConfig};
