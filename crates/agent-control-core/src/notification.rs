//! Observer notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    model::{CommandId, SessionId},
    status::AgentStatus,
};

/// Normalised command response as re-broadcast to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub device_id: String,
    pub command: String,
    pub command_id: Option<CommandId>,
    pub status: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// State-change notification pushed to every observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Notification {
    ClientConnected {
        device_id: String,
        device_name: String,
        platform: String,
        sid: SessionId,
    },
    ClientDisconnected {
        device_id: String,
        sid: SessionId,
    },
    ClientStatusUpdate {
        sid: SessionId,
        device_id: String,
        last_seen: DateTime<Utc>,
        status: AgentStatus,
    },
    CommandSent {
        command_id: CommandId,
        command: String,
        device_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Response to a tracked command, or an untracked response.
    CommandResult(CommandOutcome),
    /// Response to a command that had already timed out or been answered.
    ///
    /// Settled ids are remembered for a retention window (one hour by
    /// default). A response arriving after that is broadcast as an untracked
    /// `CommandResult`.
    LateCommandResult(CommandOutcome),
    CommandTimeout {
        command_id: CommandId,
        command: String,
        device_id: String,
        timeout: u64,
        timestamp: DateTime<Utc>,
    },
}

impl Notification {
    /// Wire name of the event.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::ClientConnected { .. } => "client_connected",
            Self::ClientDisconnected { .. } => "client_disconnected",
            Self::ClientStatusUpdate { .. } => "client_status_update",
            Self::CommandSent { .. } => "command_sent",
            Self::CommandResult(_) => "command_result",
            Self::LateCommandResult(_) => "late_command_result",
            Self::CommandTimeout { .. } => "command_timeout",
        }
    }

    /// Command id carried by command-related notifications.
    #[must_use]
    pub fn command_id(&self) -> Option<&str> {
        match self {
            Self::CommandSent { command_id, .. } | Self::CommandTimeout { command_id, .. } => {
                Some(command_id)
            }
            Self::CommandResult(outcome) | Self::LateCommandResult(outcome) => {
                outcome.command_id.as_deref()
            }
            _ => None,
        }
    }
}
