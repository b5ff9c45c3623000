//! Application layer for relay-hub.
//!
//! The application layer orchestrates the business logic: it knows *what* to
//! do with each message, but delegates *how* bytes move to the infrastructure
//! layer.
//!
//! # Responsibilities
//!
//! - Routing producer telemetry to watchers and control commands to devices
//! - Sharing the session registry and subscription index between tasks
//! - Sweeping silent devices Offline on a timer
//! - Defining the `RouteError` type for routing failures
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or listening for connections (that is infrastructure)
//! - WebSocket framing (handled by tokio-tungstenite)
//! - Reading config files (infrastructure) or CLI flags (`main.rs`)

pub mod clock;
pub mod connection;
pub mod guarded;
pub mod liveness;
pub mod router;
pub mod stats;

pub use clock::{Clock, SystemClock};
pub use connection::{ConnectionHandle, ConnectionTable, Outbound, SendOutcome};
pub use liveness::{LivenessMonitor, SweepReport};
pub use router::{RouteError, Router};
pub use stats::{RouterStats, StatsSnapshot};
