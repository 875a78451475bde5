//! Domain records shared by the registry, tracker and observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CommandArgs, status::AgentStatus};

/// Transport-assigned connection identifier.
pub type SessionId = String;

/// Correlation identifier binding a command to its response or timeout.
pub type CommandId = String;

/// Per-session command statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCounters {
    pub commands_sent: u64,
    pub commands_succeeded: u64,
    pub commands_failed: u64,
}

/// Optional telemetry reported through heartbeats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Battery level or structured battery state, as reported.
    pub battery: Option<Value>,
    /// Network quality, as reported.
    pub network_quality: Option<Value>,
}

/// A live, registered agent connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSession {
    pub session_id: SessionId,
    /// Agent-declared identity. Not unique across reconnects.
    pub device_id: String,
    pub display_name: String,
    pub platform: String,
    pub network_address: Option<String>,
    pub connected_at: DateTime<Utc>,
    /// Never decreases; see [`AgentSession::mark_seen`].
    pub last_seen: DateTime<Utc>,
    /// Cached classification. Recompute with [`crate::StatusThresholds`] before use.
    pub status: AgentStatus,
    #[serde(flatten)]
    pub counters: CommandCounters,
    #[serde(flatten)]
    pub telemetry: Telemetry,
}

impl AgentSession {
    /// Create a freshly registered session.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        device_id: String,
        display_name: String,
        platform: String,
        network_address: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            device_id,
            display_name,
            platform,
            network_address,
            connected_at: now,
            last_seen: now,
            status: AgentStatus::Active,
            counters: CommandCounters::default(),
            telemetry: Telemetry::default(),
        }
    }

    /// Advance `last_seen` to `now` unless it is already later.
    pub fn mark_seen(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }
}

/// Point-in-time view of a session for operators and observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    #[serde(flatten)]
    pub session: AgentSession,
    /// Whole seconds since `last_seen` at snapshot time.
    pub time_since_last_seen: i64,
}

/// Lifecycle of a tracked command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Completed,
    TimedOut,
}

/// A dispatched command awaiting its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlightCommand {
    pub command_id: CommandId,
    pub command_name: String,
    pub arguments: CommandArgs,
    pub target_session_id: SessionId,
    pub target_device_id: String,
    pub sent_at: DateTime<Utc>,
    pub status: CommandStatus,
    pub timeout_secs: u64,
}

/// One entry of a device's location history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: f64,
    /// Timestamp reported by the device, kept verbatim.
    #[serde(rename = "timestamp")]
    pub source_timestamp: String,
    pub recorded_at: DateTime<Utc>,
}

impl LocationRecord {
    /// Map link for this position.
    #[must_use]
    pub fn maps_url(&self) -> String {
        maps_url(self.latitude, self.longitude)
    }
}

/// Build a map link for a coordinate pair.
#[must_use]
pub fn maps_url(latitude: f64, longitude: f64) -> String {
    format!("https://www.google.com/maps?q={latitude},{longitude}")
}
