//! Connection parameters read from the WebSocket upgrade request.
//!
//! Clients say who they are in the query string of the URL they connect to:
//!
//! ```text
//! ws://hub:8080/?role=producer&deviceId=pixel-7&model=Pixel%207
//! ws://hub:8080/?role=observer
//! ws://hub:8080/?deviceId=pixel-7          (older phones: no role at all)
//! ```
//!
//! The role is decided here, once, and never re-inferred from message
//! shapes later on.

use thiserror::Error;
use tokio_tungstenite::tungstenite::handshake::server::ErrorResponse;
use tokio_tungstenite::tungstenite::http::StatusCode;
use url::form_urlencoded;

use relay_core::{DeviceId, IdError, Metadata, Role};

/// Why an upgrade request was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("unknown role {0:?}; expected producer or observer")]
    UnknownRole(String),

    #[error("deviceId must not be empty")]
    EmptyDeviceId,
}

impl From<IdError> for HandshakeError {
    fn from(e: IdError) -> Self {
        match e {
            IdError::EmptyDeviceId => HandshakeError::EmptyDeviceId,
            IdError::UnknownRole(role) => HandshakeError::UnknownRole(role),
        }
    }
}

/// Everything the hub learns about a connection before the first message.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    pub role: Role,
    /// Device a producer connection speaks for.  Always `None` for observers.
    pub device_id: Option<DeviceId>,
    /// Remaining query parameters, as strings.
    pub metadata: Metadata,
}

impl ConnectionParams {
    /// Parses the query string of the upgrade request.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError`] for an unknown `role` or an empty `deviceId`.
    pub fn from_query(query: Option<&str>) -> Result<Self, HandshakeError> {
        let mut role = None;
        let mut device_id = None;
        let mut metadata = Metadata::new();

        for (key, value) in form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
            match &*key {
                "role" => role = Some(Role::parse(&value)?),
                "deviceId" => device_id = Some(DeviceId::new(value)?),
                _ => {
                    metadata.insert(key.into_owned(), value.into_owned().into());
                }
            }
        }

        let role = role.unwrap_or(if device_id.is_some() {
            Role::Producer
        } else {
            Role::Observer
        });
        if role == Role::Observer {
            device_id = None;
        }

        Ok(Self {
            role,
            device_id,
            metadata,
        })
    }

    /// The registration a producer handshake implies, if it named a device.
    pub fn implicit_registration(&self) -> Option<(DeviceId, Metadata)> {
        match (self.role, &self.device_id) {
            (Role::Producer, Some(device_id)) => Some((device_id.clone(), self.metadata.clone())),
            _ => None,
        }
    }
}

/// Builds the `400 Bad Request` response for a refused upgrade.
pub fn reject(error: &HandshakeError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(error.to_string()));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

// ── Tests ─────────────────────────────────────────────────────────────────────
