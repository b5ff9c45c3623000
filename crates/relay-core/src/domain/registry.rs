//! SessionRegistry: the authoritative device → connection mapping.
//!
//! The registry answers one question for the router: *which producer
//! connection currently speaks for this device, if any?*  It also owns the
//! Online/Offline status of every device and reports each status transition
//! as a [`RegistryEvent`] so the caller can notify observers.
//!
//! # Supersession (for beginners)
//!
//! A phone that loses Wi-Fi for a moment usually reconnects before the hub
//! notices the old socket is dead.  Registration is therefore an *upsert*:
//! the most recent `register` wins, and the previous connection is
//! *superseded*.  Anything the superseded socket still sends is ignored
//! because [`SessionRegistry::touch`] only accepts traffic from the
//! authoritative connection, and a late disconnect of the old socket does not
//! mark the device Offline because it no longer matches.
//!
//! # Locking
//!
//! All methods take `&mut self` or `&self`.  The hub keeps the registry behind
//! a single mutex, which serialises register, mark-offline, and sweep for the
//! same device and rules out lost updates.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use super::ids::{ConnectionId, DeviceId};
use super::session::{
    DeviceSession, Metadata, OfflineReason, RegistryChange, RegistryEvent, SessionSnapshot,
    SessionStatus,
};

/// Result of [`SessionRegistry::register`].
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    /// Copy of the session after the upsert.
    pub session: DeviceSession,
    /// The connection that spoke for this device before, if it was a
    /// different, still-Online connection.
    pub superseded: Option<ConnectionId>,
    /// Always an [`RegistryChange::Online`] event for the device.
    pub event: RegistryEvent,
}

/// In-memory registry of every known device.
///
/// # HashMap choice
///
/// A `HashMap<DeviceId, DeviceSession>` provides O(1) lookup for the hot
/// paths (touch on every frame, route lookup on every control command).
/// Snapshots are sorted by device id before they leave the registry so the
/// observer-facing list is stable.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<DeviceId, DeviceSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert of a device's session.
    ///
    /// - New device: creates an Online session with `last_activity = now`.
    /// - Known device: replaces connection and metadata, sets Online, and
    ///   refreshes `last_activity`.
    pub fn register(
        &mut self,
        device_id: DeviceId,
        connection_id: ConnectionId,
        metadata: Metadata,
        now: Instant,
    ) -> RegisterOutcome {
        let mut superseded = None;

        let session = match self.sessions.get_mut(&device_id) {
            Some(existing) => {
                if existing.is_online() && existing.connection_id != Some(connection_id) {
                    superseded = existing.connection_id;
                }
                existing.connection_id = Some(connection_id);
                existing.metadata = metadata;
                existing.status = SessionStatus::Online;
                existing.offline_since = None;
                existing.refresh(now);
                existing.clone()
            }
            None => {
                let created =
                    DeviceSession::online(device_id.clone(), connection_id, metadata, now);
                self.sessions.insert(device_id.clone(), created.clone());
                created
            }
        };

        debug!(
            device = %device_id,
            connection = %connection_id,
            superseded = ?superseded.map(|c| c.to_string()),
            "session registered"
        );

        RegisterOutcome {
            session,
            superseded,
            event: RegistryEvent {
                device_id,
                change: RegistryChange::Online,
            },
        }
    }

    /// Records activity for `device_id` on behalf of `connection_id`.
    ///
    /// Returns `true` only when the device is Online *and* `connection_id` is
    /// its authoritative connection.  Unknown, Offline, and superseded senders
    /// are silently ignored: producers routinely race with disconnect handling.
    pub fn touch(&mut self, device_id: &DeviceId, connection_id: ConnectionId, now: Instant) -> bool {
        match self.sessions.get_mut(device_id) {
            Some(session)
                if session.is_online() && session.connection_id == Some(connection_id) =>
            {
                session.refresh(now);
                true
            }
            _ => false,
        }
    }

    /// Marks every Online session owned by `connection_id` as Offline.
    ///
    /// Called when a producer's transport closes.  A second call for the same
    /// connection finds nothing to change and returns no events.
    pub fn mark_offline(&mut self, connection_id: ConnectionId, now: Instant) -> Vec<RegistryEvent> {
        let mut events: Vec<RegistryEvent> = self
            .sessions
            .values_mut()
            .filter(|s| s.connection_id == Some(connection_id))
            .filter_map(|s| {
                s.go_offline(now).then(|| RegistryEvent {
                    device_id: s.device_id.clone(),
                    change: RegistryChange::Offline(OfflineReason::Disconnected),
                })
            })
            .collect();
        events.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        events
    }

    /// Transitions every Online session idle for longer than `threshold` to
    /// Offline and returns the affected device ids.
    ///
    /// Sessions that are already Offline are skipped, so consecutive sweeps
    /// without new traffic report each device at most once.
    pub fn sweep_expired(&mut self, threshold: Duration, now: Instant) -> Vec<DeviceId> {
        let mut expired: Vec<DeviceId> = self
            .sessions
            .values_mut()
            .filter(|s| s.is_online() && s.idle_for(now) > threshold)
            .filter_map(|s| s.go_offline(now).then(|| s.device_id.clone()))
            .collect();
        expired.sort();
        expired
    }

    /// Removes Offline sessions that have been Offline for longer than
    /// `grace` and are not watched by anyone.
    pub fn collect_garbage(
        &mut self,
        grace: Duration,
        now: Instant,
        is_watched: impl Fn(&DeviceId) -> bool,
    ) -> Vec<DeviceId> {
        let mut removed: Vec<DeviceId> = self
            .sessions
            .values()
            .filter(|s| !s.is_online())
            .filter(|s| {
                s.offline_since
                    .map(|since| now.saturating_duration_since(since) > grace)
                    .unwrap_or(false)
            })
            .filter(|s| !is_watched(&s.device_id))
            .map(|s| s.device_id.clone())
            .collect();
        removed.sort();

        for id in &removed {
            self.sessions.remove(id);
        }
        removed
    }

    /// Returns the connection a control command for `device_id` should go to,
    /// or `None` if the device is unknown or Offline.
    pub fn route_target(&self, device_id: &DeviceId) -> Option<ConnectionId> {
        self.sessions
            .get(device_id)
            .filter(|s| s.is_online())
            .and_then(|s| s.connection_id)
    }

    /// Returns the session for a specific device.
    pub fn get(&self, device_id: &DeviceId) -> Option<&DeviceSession> {
        self.sessions.get(device_id)
    }

    /// Returns a deep, point-in-time copy of every session, sorted by id.
    pub fn list_all(&self, now: Instant) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> =
            self.sessions.values().map(|s| s.snapshot(now)).collect();
        all.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
