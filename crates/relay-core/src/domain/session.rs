//! Per-device session record.
//!
//! # Session lifecycle (for beginners)
//!
//! ```text
//!                 register                 disconnect / sweep
//! Unregistered ─────────────► Online ─────────────────────────► Offline
//!                               ▲                                  │
//!                               └────────── re-register ───────────┘
//! ```
//!
//! There is no terminal state: an Offline session is kept so control panels
//! still see the device in their list, and is only garbage-collected after a
//! long grace period when nobody is watching it.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::ids::{ConnectionId, DeviceId};

/// Descriptive fields supplied by the producer (model, screen size, protocol
/// version, ...).  Opaque to the hub; passed through to observers untouched.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Whether a device currently has an authoritative producer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Online,
    Offline,
}

/// Why a session went Offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReason {
    /// The producer's transport connection closed.
    Disconnected,
    /// No traffic arrived within the liveness threshold.
    Expired,
}

/// The kind of registry transition that observers are told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    /// A producer registered (new device, reconnect, or metadata refresh).
    Online,
    /// The device lost its producer connection.
    Offline(OfflineReason),
    /// The Offline session was garbage-collected.
    Removed,
}

/// One state transition of one device.
///
/// Every operation of the registry that actually changes a session's status
/// returns one of these; no event is produced for a no-op (for example a
/// sweep that finds an already-Offline session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEvent {
    pub device_id: DeviceId,
    pub change: RegistryChange,
}

/// The authoritative record for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSession {
    pub device_id: DeviceId,
    /// Current producer connection; `None` while Offline.
    pub connection_id: Option<ConnectionId>,
    pub metadata: Metadata,
    pub status: SessionStatus,
    /// Monotonic time of the last inbound message from the authoritative
    /// connection.  Only ever moves forward.
    pub last_activity: Instant,
    /// When the session last went Offline; drives garbage collection.
    pub offline_since: Option<Instant>,
}

impl DeviceSession {
    /// Creates a fresh Online session.
    pub fn online(
        device_id: DeviceId,
        connection_id: ConnectionId,
        metadata: Metadata,
        now: Instant,
    ) -> Self {
        Self {
            device_id,
            connection_id: Some(connection_id),
            metadata,
            status: SessionStatus::Online,
            last_activity: now,
            offline_since: None,
        }
    }

    /// Returns `true` if the session is Online.
    pub fn is_online(&self) -> bool {
        self.status == SessionStatus::Online
    }

    /// Moves `last_activity` forward to `now`, never backwards.
    pub fn refresh(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    /// Time elapsed since the last activity, saturating at zero.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Transitions to Offline.  Returns `false` if the session was already Offline.
    pub(crate) fn go_offline(&mut self, now: Instant) -> bool {
        if !self.is_online() {
            return false;
        }
        self.status = SessionStatus::Offline;
        self.connection_id = None;
        self.offline_since = Some(now);
        true
    }

    /// Builds the point-in-time view sent to observers.
    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            device_id: self.device_id.clone(),
            connection_id: self.connection_id,
            status: self.status,
            metadata: self.metadata.clone(),
            idle_ms: self.idle_for(now).as_millis() as u64,
        }
    }
}

/// Deep, serialisable copy of a session as seen by observers.
///
/// ```json
/// {"deviceId":"dev-1","connectionId":"67e5...","status":"online",
///  "metadata":{"model":"Pixel"},"idleMs":120}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub device_id: DeviceId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub connection_id: Option<ConnectionId>,
    pub status: SessionStatus,
    pub metadata: Metadata,
    pub idle_ms: u64,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
