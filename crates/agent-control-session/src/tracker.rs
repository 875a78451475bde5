//! In-flight command tracking.
//!
//! A command leaves the tracker exactly once, through either [`CommandTracker::complete`]
//! or [`CommandTracker::expire_if_pending`]. Whichever runs first removes the
//! entry; the other finds nothing and returns `None`. Settled ids are then
//! remembered for a retention window so repeat responses can be recognised.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use agent_control_core::{CommandArgs, CommandId, CommandStatus, InFlightCommand};
use chrono::Utc;
use tokio::{sync::Mutex, time::Instant};

/// How long a settled command id is remembered.
pub const DEFAULT_SETTLED_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Default)]
struct TrackerState {
    pending: HashMap<CommandId, InFlightCommand>,
    settled: HashMap<CommandId, CommandStatus>,
    settled_order: VecDeque<(Instant, CommandId)>,
}

impl TrackerState {
    fn settle(&mut self, command_id: CommandId, status: CommandStatus, retention: Duration) {
        let now = Instant::now();
        self.prune(now, retention);
        self.settled.insert(command_id.clone(), status);
        self.settled_order.push_back((now, command_id));
    }

    /// Forget ids settled longer than `retention` ago. Entries are appended in
    /// time order, so pruning stops at the first one still inside the window.
    fn prune(&mut self, now: Instant, retention: Duration) {
        while let Some((at, _)) = self.settled_order.front() {
            if now.duration_since(*at) < retention {
                break;
            }
            if let Some((_, command_id)) = self.settled_order.pop_front() {
                self.settled.remove(&command_id);
            }
        }
    }
}

/// Tracker of commands awaiting a response.
pub struct CommandTracker {
    state: Mutex<TrackerState>,
    sequence: AtomicU64,
    retention: Duration,
}

impl Default for CommandTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_SETTLED_RETENTION)
    }
}

impl CommandTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker remembering settled ids for `retention`.
    #[must_use]
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            sequence: AtomicU64::new(0),
            retention,
        }
    }

    /// Generate a command id: `<name>_<UTC timestamp to the microsecond>_<sequence>`.
    ///
    /// The process-wide sequence breaks ties between commands issued within the
    /// same microsecond.
    fn next_id(&self, command_name: &str) -> CommandId {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "{command_name}_{}_{seq}",
            Utc::now().format("%Y%m%d%H%M%S%6f")
        )
    }

    /// Start tracking a command. Callers validate the target beforehand.
    pub async fn begin(
        &self,
        command_name: &str,
        target_session_id: &str,
        target_device_id: &str,
        arguments: CommandArgs,
        timeout_secs: u64,
    ) -> CommandId {
        let command_id = self.next_id(command_name);
        let command = InFlightCommand {
            command_id: command_id.clone(),
            command_name: command_name.to_string(),
            arguments,
            target_session_id: target_session_id.to_string(),
            target_device_id: target_device_id.to_string(),
            sent_at: Utc::now(),
            status: CommandStatus::Pending,
            timeout_secs,
        };
        self.state
            .lock()
            .await
            .pending
            .insert(command_id.clone(), command);
        command_id
    }

    /// Remove a command because its response arrived.
    ///
    /// `None` means it already completed or timed out.
    pub async fn complete(&self, command_id: &str) -> Option<InFlightCommand> {
        self.finish(command_id, CommandStatus::Completed).await
    }

    /// Remove a command because its timeout elapsed.
    ///
    /// `None` means the response won the race.
    pub async fn expire_if_pending(&self, command_id: &str) -> Option<InFlightCommand> {
        self.finish(command_id, CommandStatus::TimedOut).await
    }

    async fn finish(&self, command_id: &str, status: CommandStatus) -> Option<InFlightCommand> {
        let mut state = self.state.lock().await;
        let mut command = state.pending.remove(command_id)?;
        state.settle(command.command_id.clone(), status, self.retention);
        drop(state);
        command.status = status;
        Some(command)
    }

    /// How `command_id` settled, if it did so within the retention window.
    pub async fn settled(&self, command_id: &str) -> Option<CommandStatus> {
        let mut state = self.state.lock().await;
        state.prune(Instant::now(), self.retention);
        state.settled.get(command_id).copied()
    }

    /// Snapshot of one pending command.
    pub async fn get(&self, command_id: &str) -> Option<InFlightCommand> {
        self.state.lock().await.pending.get(command_id).cloned()
    }

    /// Snapshot of every pending command, oldest first.
    pub async fn pending(&self) -> Vec<InFlightCommand> {
        let mut commands: Vec<_> = self.state.lock().await.pending.values().cloned().collect();
        commands.sort_by_key(|c| c.sent_at);
        commands
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}
