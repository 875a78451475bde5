//! Command dispatch with timeout supervision.

use std::{sync::Arc, time::Duration};

use agent_control_core::{
    CommandArgs, CommandCatalog, CommandId, ControlError, Notification, NotificationHub,
    PeerMessage, PeerSender,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{registry::Registry, tracker::CommandTracker};

/// Default command timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Upper bound accepted for a per-command timeout.
pub const MAX_TIMEOUT_SECS: u64 = 600;

/// Outcome returned to the operator. Never an error across the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchResult {
    Sent {
        command_id: CommandId,
        message: String,
    },
    Error {
        message: String,
    },
}

impl DispatchResult {
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    #[must_use]
    pub fn command_id(&self) -> Option<&str> {
        match self {
            Self::Sent { command_id, .. } => Some(command_id),
            Self::Error { .. } => None,
        }
    }
}

impl From<ControlError> for DispatchResult {
    fn from(e: ControlError) -> Self {
        Self::Error {
            message: e.to_string(),
        }
    }
}

/// Timeout policy for dispatched commands.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    pub default_secs: u64,
    pub max_secs: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            default_secs: DEFAULT_TIMEOUT_SECS,
            max_secs: MAX_TIMEOUT_SECS,
        }
    }
}

impl TimeoutPolicy {
    /// Requested timeout, defaulted and clamped to `1..=max_secs`.
    #[must_use]
    pub fn resolve(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_secs)
            .clamp(1, self.max_secs.max(1))
    }
}

/// Turns operator requests into tracked, addressed commands.
pub struct Dispatcher {
    registry: Arc<Registry>,
    tracker: Arc<CommandTracker>,
    peers: Arc<dyn PeerSender>,
    hub: Arc<NotificationHub>,
    catalog: CommandCatalog,
    timeouts: TimeoutPolicy,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        tracker: Arc<CommandTracker>,
        peers: Arc<dyn PeerSender>,
        hub: Arc<NotificationHub>,
        catalog: CommandCatalog,
        timeouts: TimeoutPolicy,
    ) -> Self {
        Self {
            registry,
            tracker,
            peers,
            hub,
            catalog,
            timeouts,
        }
    }

    /// Send a command to a registered session.
    ///
    /// Returns as soon as the command is queued; the response or the timeout is
    /// reported later through notifications. Validation and unknown targets
    /// fail without touching the registry or tracker.
    pub async fn dispatch(
        &self,
        target_session_id: &str,
        command_name: &str,
        arguments: CommandArgs,
        timeout_secs: Option<u64>,
    ) -> DispatchResult {
        self.try_dispatch(target_session_id, command_name, arguments, timeout_secs)
            .await
            .unwrap_or_else(DispatchResult::from)
    }

    /// Like [`Dispatcher::dispatch`], keeping the failure typed.
    ///
    /// # Errors
    /// `InvalidCommand` when the catalog rejects the request and
    /// `TargetNotConnected` when no registered session has that id.
    pub async fn try_dispatch(
        &self,
        target_session_id: &str,
        command_name: &str,
        arguments: CommandArgs,
        timeout_secs: Option<u64>,
    ) -> Result<DispatchResult, ControlError> {
        if let Err(e) = self.catalog.validate(command_name, &arguments) {
            tracing::warn!(sid = target_session_id, "rejected command: {e}");
            return Err(e);
        }

        let Some(target) = self.registry.record_sent(target_session_id).await else {
            let err = ControlError::TargetNotConnected {
                session_id: target_session_id.to_string(),
                command: command_name.to_string(),
            };
            tracing::error!("{err}");
            return Err(err);
        };

        let timeout_secs = self.timeouts.resolve(timeout_secs);
        let command_id = self
            .tracker
            .begin(
                command_name,
                target_session_id,
                &target.device_id,
                arguments.clone(),
                timeout_secs,
            )
            .await;

        tracing::info!(
            command = command_name,
            %command_id,
            device_id = %target.device_id,
            sid = target_session_id,
            "sending command"
        );

        let message = PeerMessage::Command {
            command: command_name.to_string(),
            command_id: command_id.clone(),
            args: arguments,
        };
        if let Err(e) = self.peers.send_to(target_session_id, message).await {
            // The timeout task still resolves the command.
            tracing::warn!(%command_id, "failed to queue command for peer: {e}");
        }

        self.hub.push(Notification::CommandSent {
            command_id: command_id.clone(),
            command: command_name.to_string(),
            device_id: target.device_id.clone(),
            timestamp: Utc::now(),
        });

        self.spawn_timeout(command_id.clone(), timeout_secs);

        Ok(DispatchResult::Sent {
            message: format!(
                "Command '{command_name}' sent to device '{}'.",
                target.device_id
            ),
            command_id,
        })
    }

    /// Fire-once watcher. It is never cancelled; a command that already
    /// completed makes the expiry a no-op.
    fn spawn_timeout(&self, command_id: CommandId, timeout_secs: u64) {
        let tracker = Arc::clone(&self.tracker);
        let registry = Arc::clone(&self.registry);
        let hub = Arc::clone(&self.hub);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;

            let Some(command) = tracker.expire_if_pending(&command_id).await else {
                tracing::debug!(%command_id, "command resolved before timeout");
                return;
            };

            tracing::warn!(
                command = %command.command_name,
                %command_id,
                device_id = %command.target_device_id,
                "command timed out after {timeout_secs} seconds"
            );

            if !registry.record_failure(&command.target_session_id).await {
                tracing::debug!(sid = %command.target_session_id, "timed-out target already gone");
            }

            hub.push(Notification::CommandTimeout {
                command_id: command.command_id,
                command: command.command_name,
                device_id: command.target_device_id,
                timeout: timeout_secs,
                timestamp: Utc::now(),
            });
        });
    }
}
