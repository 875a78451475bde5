//! Inbound event payloads sent by agents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ControlError, status::AgentStatus};

/// Commands whose successful responses carry a position fix.
pub const LOCATION_COMMANDS: &[&str] = &["command_get_location", "get_location"];

/// `register_device` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterPayload {
    #[serde(rename = "deviceId", default)]
    pub device_id: Option<Value>,
    #[serde(rename = "deviceName", default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

impl RegisterPayload {
    /// Declared device id, if it is a non-empty string or a number.
    #[must_use]
    pub fn device_id(&self) -> Option<String> {
        match self.device_id.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// `device_heartbeat` body. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub battery: Option<Value>,
    #[serde(default)]
    pub network: Option<Value>,
}

impl HeartbeatPayload {
    /// Reported status, when it names a known classification.
    #[must_use]
    pub fn status(&self) -> Option<AgentStatus> {
        self.status.as_deref()?.parse().ok()
    }
}

/// `command_response` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponsePayload {
    #[serde(default = "unknown_command")]
    pub command: String,
    #[serde(default)]
    pub command_id: Option<String>,
    #[serde(default = "unknown_status")]
    pub status: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
}

fn unknown_command() -> String {
    "unknown_command".to_string()
}

fn unknown_status() -> String {
    "unknown".to_string()
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// How an agent-reported status affects session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Succeeded,
    Failed,
    Other,
}

impl CommandResponsePayload {
    #[must_use]
    pub fn kind(&self) -> ResponseKind {
        match self.status.as_str() {
            "success" => ResponseKind::Succeeded,
            "error" | "failed" => ResponseKind::Failed,
            _ => ResponseKind::Other,
        }
    }

    /// Successful response to a recognised location command.
    #[must_use]
    pub fn is_location_report(&self) -> bool {
        self.kind() == ResponseKind::Succeeded && LOCATION_COMMANDS.contains(&self.command.as_str())
    }
}

/// Position fix extracted from a location response.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub source_timestamp: Option<String>,
}

impl LocationFix {
    /// Extract a fix from a response payload.
    ///
    /// Returns `Ok(None)` when the payload does not carry both coordinates.
    ///
    /// # Errors
    /// Returns `MalformedPayload` if a coordinate is present but not numeric.
    pub fn from_payload(payload: &Value) -> Result<Option<Self>, ControlError> {
        let (Some(lat), Some(lng)) = (payload.get("latitude"), payload.get("longitude")) else {
            return Ok(None);
        };

        let latitude = number(lat, "latitude")?;
        let longitude = number(lng, "longitude")?;
        let accuracy = match payload.get("accuracy") {
            Some(v) if !v.is_null() => number(v, "accuracy")?,
            _ => 0.0,
        };
        let source_timestamp = payload
            .get("timestamp_gps")
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            });

        Ok(Some(Self {
            latitude,
            longitude,
            accuracy,
            source_timestamp,
        }))
    }
}

fn number(value: &Value, field: &str) -> Result<f64, ControlError> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
    .ok_or_else(|| ControlError::MalformedPayload(format!("'{field}' is not a number: {value}")))
}
