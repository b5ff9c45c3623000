//! Domain entities for the device relay hub.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain** (or "entities" layer).  Domain code:
//!
//! - Contains the core business rules of the application.
//! - Has **no** imports from network libraries, async runtimes, or locks.
//! - Can be compiled and tested on any platform without any external setup.
//! - Defines the data types and operations that make the system what it is:
//!   here, the idea that a device is *Online* through exactly one producer
//!   connection, and that observers *watch* devices.
//!
//! Time is passed in explicitly (`now: Instant`) instead of being read from the
//! system clock, so every state transition can be tested deterministically.

/// Identity newtypes and the connection role.
pub mod ids;

/// Session registry: device id → current producer connection and status.
pub mod registry;

/// Per-device session record and the change events it produces.
pub mod session;

/// Subscription index: which observer connections watch which devices.
pub mod subscription;
