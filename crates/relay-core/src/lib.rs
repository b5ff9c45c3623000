//! # relay-core
//!
//! Shared library for the device relay hub containing the session registry,
//! the subscription index, and the JSON message protocol.
//!
//! The crate has zero dependencies on sockets, async runtimes, or locks.
//! Everything here is plain data plus `&mut self` operations; the hub crate
//! decides how the structures are shared between connection tasks.
//!
//! # Architecture overview (for beginners)
//!
//! The relay hub sits between two kinds of WebSocket clients:
//!
//! - **Producers** are phones that stream screen frames and UI layout trees.
//! - **Observers** are control panels that watch a phone's screen and send
//!   tap/swipe commands back to it.
//!
//! The hub never looks inside a frame or a command.  It only needs to know
//! *who is connected*, *who is watching whom*, and *where a message goes*.
//! This crate holds exactly that knowledge:
//!
//! - **`domain`** – Identities ([`DeviceId`], [`ConnectionId`], [`Role`]), the
//!   per-device [`DeviceSession`], the [`SessionRegistry`] that maps a device
//!   to its current producer connection, and the [`SubscriptionIndex`] that
//!   maps devices to the observers watching them.
//!
//! - **`protocol`** – The JSON "language" spoken over WebSocket: inbound
//!   [`ClientMessage`] variants, outbound [`HubMessage`] variants, and the codec
//!   that validates and (de)serialises them.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `relay_core::SessionRegistry` instead of `relay_core::domain::registry::SessionRegistry`.
pub use domain::ids::{ConnectionId, DeviceId, IdError, Role};
pub use domain::registry::{RegisterOutcome, SessionRegistry};
pub use domain::session::{
    DeviceSession, Metadata, OfflineReason, RegistryChange, RegistryEvent, SessionSnapshot,
    SessionStatus,
};
pub use domain::subscription::SubscriptionIndex;
pub use protocol::codec::{decode_client_message, encode_hub_message, ProtocolError};
pub use protocol::messages::{ClientMessage, HubMessage};
