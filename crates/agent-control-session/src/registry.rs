//! Connection registry: who is connected right now.
//!
//! Maps transport session ids to registered [`AgentSession`] records. Every
//! mutation happens under one write lock and emits its notification before the
//! lock is released, so observers see changes in the order they were applied.

use std::{collections::HashMap, sync::Arc};

use agent_control_core::{
    AgentSession, AgentSnapshot, AgentStatus, ControlError, Notification, NotificationHub,
    SessionId, StatusThresholds,
    payload::ResponseKind,
    status::elapsed_secs,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

/// Optional fields carried by a heartbeat.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<AgentStatus>,
    pub battery: Option<Value>,
    pub network_quality: Option<Value>,
}

/// Registry of live, registered agent sessions.
pub struct Registry {
    sessions: RwLock<HashMap<SessionId, AgentSession>>,
    hub: Arc<NotificationHub>,
    thresholds: StatusThresholds,
}

impl Registry {
    /// Create an empty registry publishing to `hub`.
    #[must_use]
    pub fn new(hub: Arc<NotificationHub>, thresholds: StatusThresholds) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            hub,
            thresholds,
        }
    }

    #[must_use]
    pub const fn thresholds(&self) -> StatusThresholds {
        self.thresholds
    }

    /// Register a session, replacing any prior record under the same id.
    ///
    /// # Errors
    /// Returns `MissingIdentity` if `device_id` is blank.
    pub async fn register(
        &self,
        session_id: &str,
        device_id: &str,
        display_name: &str,
        platform: &str,
        remote_address: Option<String>,
    ) -> Result<AgentSession, ControlError> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(ControlError::MissingIdentity);
        }

        let session = AgentSession::new(
            session_id.to_string(),
            device_id.to_string(),
            display_name.to_string(),
            platform.to_string(),
            remote_address,
            Utc::now(),
        );

        let mut sessions = self.sessions.write().await;
        if let Some(prior) = sessions.insert(session_id.to_string(), session.clone()) {
            tracing::info!(
                sid = session_id,
                prior_device = %prior.device_id,
                "replacing existing registration"
            );
        }
        self.hub.push(Notification::ClientConnected {
            device_id: session.device_id.clone(),
            device_name: session.display_name.clone(),
            platform: session.platform.clone(),
            sid: session.session_id.clone(),
        });
        drop(sessions);

        Ok(session)
    }

    /// Record a heartbeat at the current time.
    pub async fn touch(&self, session_id: &str, update: SessionUpdate) -> Option<AgentSession> {
        self.touch_at(session_id, update, Utc::now()).await
    }

    /// Record a heartbeat at `now`.
    ///
    /// `last_seen` always advances. A supplied status overrides the cache;
    /// otherwise the cache is recomputed from the new `last_seen`. Telemetry is
    /// replaced only when supplied. Unknown sessions yield `None` and are never
    /// created here.
    pub async fn touch_at(
        &self,
        session_id: &str,
        update: SessionUpdate,
        now: DateTime<Utc>,
    ) -> Option<AgentSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id)?;

        session.mark_seen(now);
        session.status = update
            .status
            .unwrap_or_else(|| self.thresholds.classify(session.last_seen, now));
        if let Some(battery) = update.battery {
            session.telemetry.battery = Some(battery);
        }
        if let Some(network) = update.network_quality {
            session.telemetry.network_quality = Some(network);
        }

        let session = session.clone();
        self.hub.push(status_update(&session));
        Some(session)
    }

    /// Remove a session, emitting `ClientDisconnected`.
    pub async fn remove(&self, session_id: &str) -> Option<AgentSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.remove(session_id)?;
        self.hub.push(Notification::ClientDisconnected {
            device_id: session.device_id.clone(),
            sid: session.session_id.clone(),
        });
        drop(sessions);
        Some(session)
    }

    /// Snapshot of one session.
    pub async fn get(&self, session_id: &str) -> Option<AgentSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Snapshot of every session, in no particular order.
    pub async fn list_all(&self) -> Vec<AgentSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Count a dispatched command against a session.
    ///
    /// Lookup and increment happen atomically; `None` means the target is not
    /// registered and nothing changed.
    pub async fn record_sent(&self, session_id: &str) -> Option<AgentSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id)?;
        session.counters.commands_sent += 1;
        Some(session.clone())
    }

    /// Count a timed-out command. Returns `false` if the session is gone.
    pub async fn record_failure(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(session_id).is_some_and(|session| {
            session.counters.commands_failed += 1;
            true
        })
    }

    /// Record a command response from a session.
    ///
    /// Advances `last_seen`; counters change only when `count` is set.
    pub async fn record_response(
        &self,
        session_id: &str,
        kind: ResponseKind,
        count: bool,
    ) -> Option<AgentSession> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id)?;
        session.mark_seen(now);
        if count {
            match kind {
                ResponseKind::Succeeded => session.counters.commands_succeeded += 1,
                ResponseKind::Failed => session.counters.commands_failed += 1,
                ResponseKind::Other => {}
            }
        }
        Some(session.clone())
    }

    /// Sessions ordered by status rank, then by time since last seen.
    pub async fn list_active(&self) -> Vec<AgentSnapshot> {
        self.list_active_at(Utc::now()).await
    }

    /// Classify every session against `now` and return them sorted
    /// active → idle → stale, most recently seen first.
    ///
    /// Only the returned copies carry the fresh classification. The cached
    /// status is left for [`Registry::refresh_statuses`] so every transition
    /// is still broadcast.
    pub async fn list_active_at(&self, now: DateTime<Utc>) -> Vec<AgentSnapshot> {
        let sessions = self.sessions.read().await;
        let mut snapshots: Vec<AgentSnapshot> = sessions
            .values()
            .map(|session| {
                let mut session = session.clone();
                session.status = self.thresholds.classify(session.last_seen, now);
                let time_since_last_seen = elapsed_secs(session.last_seen, now);
                AgentSnapshot {
                    session,
                    time_since_last_seen,
                }
            })
            .collect();
        drop(sessions);

        snapshots.sort_by_key(|s| (s.session.status.rank(), s.time_since_last_seen));
        snapshots
    }

    /// Reclassify every session against `now` and emit `ClientStatusUpdate`
    /// for each one whose classification changed. Returns the changed sessions.
    pub async fn refresh_statuses(&self, now: DateTime<Utc>) -> Vec<AgentSession> {
        let mut sessions = self.sessions.write().await;
        let mut changed = Vec::new();
        for session in sessions.values_mut() {
            let status = self.thresholds.classify(session.last_seen, now);
            if status != session.status {
                session.status = status;
                self.hub.push(status_update(session));
                changed.push(session.clone());
            }
        }
        changed
    }
}

fn status_update(session: &AgentSession) -> Notification {
    Notification::ClientStatusUpdate {
        sid: session.session_id.clone(),
        device_id: session.device_id.clone(),
        last_seen: session.last_seen,
        status: session.status,
    }
}
