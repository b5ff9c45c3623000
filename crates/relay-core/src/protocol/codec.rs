//! JSON codec for the device/panel protocol.
//!
//! Decoding is done in two steps so a bad message produces a useful error:
//!
//! 1. Parse the text into a generic JSON object and read its `"type"` field.
//! 2. Deserialize the object into the matching [`ClientMessage`] variant.
//!
//! A decode error never closes a connection; the hub logs it and moves on to
//! the next message.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

use crate::domain::ids::DeviceId;
use crate::protocol::messages::{ClientMessage, HubMessage};

/// Upper bound for one inbound text message.  Large enough for a base64
/// encoded full-resolution screenshot.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Every `"type"` value the hub understands, including aliases.
pub const KNOWN_TYPES: &[&str] = &[
    "register",
    "frame",
    "layout",
    "heartbeat",
    "control",
    "watch",
    "select-device",
    "unwatch",
    "list",
];

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The text is not JSON at all.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The JSON is valid but not an object with a string `"type"` field.
    #[error("message is not an object with a string \"type\" field")]
    MissingType,

    /// The `"type"` value is not one the hub understands.
    #[error("unknown message type: {0:?}")]
    UnknownType(String),

    /// The type is known but a field is missing or has the wrong shape.
    #[error("malformed {kind} message: {detail}")]
    Malformed { kind: String, detail: String },

    /// The message is larger than [`MAX_MESSAGE_BYTES`].
    #[error("message too large: {actual} bytes (limit {limit})")]
    TooLarge { actual: usize, limit: usize },

    /// A hub message could not be serialised.
    #[error("failed to encode hub message: {0}")]
    Encode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one inbound text frame into a [`ClientMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError`] if the text is oversized, not JSON, has no known
/// `"type"`, or does not match that type's shape (including an empty
/// `deviceId`).
///
/// # Examples
///
/// ```rust
/// use relay_core::protocol::{decode_client_message, ClientMessage};
///
/// let msg = decode_client_message(r#"{"type":"watch","deviceId":"dev-1"}"#).unwrap();
/// assert_eq!(msg.type_name(), "watch");
/// ```
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    if text.len() > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::TooLarge {
            actual: text.len(),
            limit: MAX_MESSAGE_BYTES,
        });
    }

    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    let kind = value
        .as_object()
        .and_then(|obj| obj.get("type"))
        .and_then(|t| t.as_str())
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed {
        kind,
        detail: e.to_string(),
    })
}

/// Serialises a [`HubMessage`] into a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialisation fails, which only
/// happens if session metadata contains values JSON cannot represent.
pub fn encode_hub_message(msg: &HubMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Wraps a raw binary screen frame from a producer into a `screen` message.
pub fn wrap_binary_frame(device_id: &DeviceId, data: &[u8]) -> HubMessage {
    HubMessage::Screen {
        device_id: device_id.clone(),
        data: STANDARD.encode(data),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
