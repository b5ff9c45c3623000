//! Identity types shared by every layer of the hub.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors produced when constructing an identity from untrusted input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    /// The device id was empty or contained only whitespace.
    #[error("device id must not be empty")]
    EmptyDeviceId,

    /// The role string did not name a known role.
    #[error("unknown connection role: {0:?}")]
    UnknownRole(String),
}

/// Stable external identity of a producer device (e.g. `"pixel-7-lab"`).
///
/// The hub never interprets the value; it is only compared for equality and
/// used as a map key.  Construction rejects empty strings so a blank id can
/// never become a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device id, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::EmptyDeviceId`] if nothing is left after trimming.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, IdError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(IdError::EmptyDeviceId);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity of one accepted transport connection.
///
/// Assigned once at accept time and never reused, so a reconnecting device
/// always gets a fresh id and stale traffic from the old socket can be told
/// apart from the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random connection id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first UUID group is plenty to tell connections apart in logs.
        let full = self.0.to_string();
        f.write_str(full.split('-').next().unwrap_or(&full))
    }
}

/// The role of a connection, decided once during the handshake.
///
/// A connection never changes role: a phone stays a producer and a control
/// panel stays an observer until the socket closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Device-side connection: sends register, frame, layout, and heartbeat.
    Producer,
    /// Control-panel connection: watches devices and sends control commands.
    Observer,
}

impl Role {
    /// Parses a role name from a handshake parameter.
    ///
    /// `producer`/`device` and `observer`/`panel` are accepted, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::UnknownRole`] for anything else.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "producer" | "device" => Ok(Role::Producer),
            "observer" | "panel" => Ok(Role::Observer),
            _ => Err(IdError::UnknownRole(raw.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Producer => f.write_str("producer"),
            Role::Observer => f.write_str("observer"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
