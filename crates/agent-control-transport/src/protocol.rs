//! Wire protocol for agent and observer sockets.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Outbound frames are the serde forms of [`PeerMessage`] and [`Notification`].

use agent_control_core::{
    AgentSnapshot, Notification, PeerMessage,
    payload::{CommandResponsePayload, HeartbeatPayload, RegisterPayload},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Frame decoding error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(#[source] serde_json::Error),
    #[error("Unknown event '{0}'")]
    UnknownEvent(String),
    #[error("Invalid '{event}' payload: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Event sent by an agent after the socket is open.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    RegisterDevice(RegisterPayload),
    DeviceHeartbeat(HeartbeatPayload),
    CommandResponse(CommandResponsePayload),
}

impl AgentEvent {
    /// Decode one text frame.
    ///
    /// A missing or `null` `data` is treated as an empty object, so every
    /// field falls back to its default.
    ///
    /// # Errors
    /// Returns `InvalidFrame` for non-JSON or frames without `event`,
    /// `UnknownEvent` for unrecognised names, and `InvalidPayload` when the
    /// data does not fit the event.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: InboundFrame =
            serde_json::from_str(text).map_err(ProtocolError::InvalidFrame)?;
        let data = if frame.data.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            frame.data
        };

        let invalid = |source| ProtocolError::InvalidPayload {
            event: frame.event.clone(),
            source,
        };
        match frame.event.as_str() {
            "register_device" => serde_json::from_value(data)
                .map(Self::RegisterDevice)
                .map_err(invalid),
            "device_heartbeat" => serde_json::from_value(data)
                .map(Self::DeviceHeartbeat)
                .map_err(invalid),
            "command_response" => serde_json::from_value(data)
                .map(Self::CommandResponse)
                .map_err(invalid),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RegisterDevice(_) => "register_device",
            Self::DeviceHeartbeat(_) => "device_heartbeat",
            Self::CommandResponse(_) => "command_response",
        }
    }
}

/// Encode a message for one agent.
///
/// # Errors
/// Returns `Encode` if serialization fails.
pub fn encode_peer(message: &PeerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

/// Encode a notification for observers.
///
/// # Errors
/// Returns `Encode` if serialization fails.
pub fn encode_notification(notification: &Notification) -> Result<String, ProtocolError> {
    serde_json::to_string(notification).map_err(ProtocolError::Encode)
}

/// First frame on an observer socket: the current client list.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ObserverGreeting<'a> {
    ClientList {
        clients: &'a [AgentSnapshot],
        count: usize,
    },
}

/// Encode the observer greeting.
///
/// # Errors
/// Returns `Encode` if serialization fails.
pub fn encode_client_list(clients: &[AgentSnapshot]) -> Result<String, ProtocolError> {
    serde_json::to_string(&ObserverGreeting::ClientList {
        clients,
        count: clients.len(),
    })
    .map_err(ProtocolError::Encode)
}
