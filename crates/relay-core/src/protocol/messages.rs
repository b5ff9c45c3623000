//! JSON message types for the device/panel WebSocket protocol.
//!
//! # Message flow
//!
//! ```text
//! Producer → Hub:  register, frame, layout, heartbeat     (ClientMessage)
//! Observer → Hub:  control, watch, unwatch, list          (ClientMessage)
//! Hub → Observer:  registry-changed, sessions, screen     (HubMessage)
//! Hub → Observer:  frame, layout                          (verbatim producer text)
//! Hub → Producer:  control                                (verbatim observer text)
//! ```
//!
//! # JSON discriminant
//!
//! Every message is a JSON object with a `"type"` field that identifies the
//! variant.  All other fields are flattened into the same object and use
//! camelCase names, matching what the phone and browser clients already send:
//!
//! ```json
//! {"type":"control","deviceId":"dev-1","action":"tap","x":10,"y":20}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute handles this automatically.
//! Unknown extra fields are ignored, so clients can add fields (a swipe's end
//! coordinates, a text payload) without the hub needing to know about them.

use serde::{Deserialize, Serialize};

use crate::domain::ids::{DeviceId, Role};
use crate::domain::session::{Metadata, OfflineReason, RegistryChange, RegistryEvent, SessionSnapshot};

// ── Client → Hub messages ─────────────────────────────────────────────────────

/// All messages a producer or observer can send to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// A producer announces (or re-announces) a device.
    Register {
        device_id: DeviceId,
        #[serde(default)]
        metadata: Metadata,
    },

    /// One encoded screen frame.
    ///
    /// Only `deviceId` is read.  Everything else (`payload`, `width`,
    /// `data`, `timestamp`, ...) is the producer's business and reaches the
    /// watchers untouched in the forwarded text.
    Frame { device_id: DeviceId },

    /// A UI hierarchy dump.  The tree is opaque to the hub.
    Layout { device_id: DeviceId },

    /// Keeps a quiet device from being swept Offline.
    Heartbeat { device_id: DeviceId },

    /// An input command for one device (tap, swipe, key, ...).
    Control {
        device_id: DeviceId,
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<f64>,
    },

    /// An observer starts watching a device.
    #[serde(alias = "select-device")]
    Watch { device_id: DeviceId },

    /// An observer stops watching a device.
    Unwatch { device_id: DeviceId },

    /// An observer asks for the current session list.
    List,
}

impl ClientMessage {
    /// The only role allowed to send this message.
    pub fn sender_role(&self) -> Role {
        match self {
            ClientMessage::Register { .. }
            | ClientMessage::Frame { .. }
            | ClientMessage::Layout { .. }
            | ClientMessage::Heartbeat { .. } => Role::Producer,
            ClientMessage::Control { .. }
            | ClientMessage::Watch { .. }
            | ClientMessage::Unwatch { .. }
            | ClientMessage::List => Role::Observer,
        }
    }

    /// The device the message is about, if any.
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            ClientMessage::Register { device_id, .. }
            | ClientMessage::Frame { device_id }
            | ClientMessage::Layout { device_id }
            | ClientMessage::Heartbeat { device_id }
            | ClientMessage::Control { device_id, .. }
            | ClientMessage::Watch { device_id }
            | ClientMessage::Unwatch { device_id } => Some(device_id),
            ClientMessage::List => None,
        }
    }

    /// Returns a short type-name string for log messages.
    ///
    /// Used instead of `{:?}` so frame payloads never end up in the logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Register { .. } => "register",
            ClientMessage::Frame { .. } => "frame",
            ClientMessage::Layout { .. } => "layout",
            ClientMessage::Heartbeat { .. } => "heartbeat",
            ClientMessage::Control { .. } => "control",
            ClientMessage::Watch { .. } => "watch",
            ClientMessage::Unwatch { .. } => "unwatch",
            ClientMessage::List => "list",
        }
    }
}

// ── Hub → Observer messages ───────────────────────────────────────────────────

/// What happened to the device named in a `registry-changed` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Online,
    Offline,
    Removed,
}

/// Why it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeReason {
    Registered,
    Disconnected,
    Expired,
    Collected,
}

impl From<RegistryChange> for (ChangeKind, ChangeReason) {
    fn from(change: RegistryChange) -> Self {
        match change {
            RegistryChange::Online => (ChangeKind::Online, ChangeReason::Registered),
            RegistryChange::Offline(OfflineReason::Disconnected) => {
                (ChangeKind::Offline, ChangeReason::Disconnected)
            }
            RegistryChange::Offline(OfflineReason::Expired) => {
                (ChangeKind::Offline, ChangeReason::Expired)
            }
            RegistryChange::Removed => (ChangeKind::Removed, ChangeReason::Collected),
        }
    }
}

/// All messages the hub itself produces.
///
/// ```json
/// {"type":"registry-changed","deviceId":"dev-1","change":"offline",
///  "reason":"expired","sessions":[...]}
/// {"type":"sessions","sessions":[...]}
/// {"type":"screen","deviceId":"dev-1","data":"/9j/4AAQ..."}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum HubMessage {
    /// Sent to every observer on each session state transition, carrying the
    /// full session list so device-list views can simply redraw.
    RegistryChanged {
        device_id: DeviceId,
        change: ChangeKind,
        reason: ChangeReason,
        sessions: Vec<SessionSnapshot>,
    },

    /// Reply to a `list` request.
    Sessions { sessions: Vec<SessionSnapshot> },

    /// A raw binary frame from a producer, re-encoded as base64.
    Screen { device_id: DeviceId, data: String },
}

impl HubMessage {
    /// Builds the notification for one registry transition.
    pub fn registry_changed(event: &RegistryEvent, sessions: Vec<SessionSnapshot>) -> Self {
        let (change, reason) = event.change.into();
        HubMessage::RegistryChanged {
            device_id: event.device_id.clone(),
            change,
            reason,
            sessions,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(id: &str) -> DeviceId {
        DeviceId::new(id).unwrap()
    }

    #[test]
    fn test_sender_role_producer_messages() {
        let msg = ClientMessage::Heartbeat { device_id: dev("d") };
        assert_eq!(msg.sender_role(), Role::Producer);
    }

    #[test]
    fn test_sender_role_observer_messages() {
        assert_eq!(ClientMessage::List.sender_role(), Role::Observer);
        let msg = ClientMessage::Watch { device_id: dev("d") };
        assert_eq!(msg.sender_role(), Role::Observer);
    }

    #[test]
    fn test_type_name_names_the_variant() {
        let msg = ClientMessage::Frame { device_id: dev("d") };
        assert_eq!(msg.type_name(), "frame");
    }

    #[test]
    fn test_list_has_no_device() {
        assert!(ClientMessage::List.device_id().is_none());
    }

    #[test]
    fn test_registry_changed_maps_expired_reason() {
        let event = RegistryEvent {
            device_id: dev("dev-1"),
            change: RegistryChange::Offline(OfflineReason::Expired),
        };

        let json = serde_json::to_value(HubMessage::registry_changed(&event, vec![])).unwrap();

        assert_eq!(json["type"], "registry-changed");
        assert_eq!(json["deviceId"], "dev-1");
        assert_eq!(json["change"], "offline");
        assert_eq!(json["reason"], "expired");
        assert_eq!(json["sessions"], serde_json::json!([]));
    }
}
