//! Messages addressed to a single connected agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    CommandArgs,
    model::{CommandId, SessionId},
};

/// Outbound event for one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Channel is live; sent before registration.
    ConnectionAcknowledged { status: String, sid: SessionId },
    RegistrationSuccessful {
        message: String,
        sid: SessionId,
        timestamp: DateTime<Utc>,
    },
    RegistrationFailed { message: String },
    HeartbeatAck { timestamp: DateTime<Utc> },
    /// Heartbeat arrived for a session the registry does not know.
    RequestRegistrationInfo {},
    Command {
        command: String,
        command_id: CommandId,
        args: CommandArgs,
    },
    /// Inbound frame could not be decoded.
    Error { message: String },
}

impl PeerMessage {
    #[must_use]
    pub fn connection_acknowledged(sid: impl Into<SessionId>) -> Self {
        Self::ConnectionAcknowledged {
            status: "connected".to_string(),
            sid: sid.into(),
        }
    }
}
