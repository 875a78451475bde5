//! Control-plane error taxonomy.

use thiserror::Error;

use crate::model::SessionId;

/// Errors raised by the registry, dispatch engine and event router.
///
/// A missing command on completion or expiry is not represented here: that race
/// is expected and surfaces as `None` from the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Registration carried no usable device id.
    #[error("Missing 'deviceId' in registration payload.")]
    MissingIdentity,

    /// Dispatch targeted a session that is not registered.
    #[error("Target SID {session_id} not found for command '{command}'.")]
    TargetNotConnected {
        session_id: SessionId,
        command: String,
    },

    /// Arguments or a response body could not be interpreted.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Command name or arguments rejected by the command catalog.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}
