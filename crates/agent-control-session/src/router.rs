//! Inbound agent event handling.
//!
//! Each handler applies one event to the registry and tracker, answers the
//! originating peer where the protocol calls for it, and notifies observers.
//! Handlers never propagate errors: failures are logged and, where useful,
//! reported back to the peer, so one bad event cannot affect other sessions.

use std::{collections::HashMap, sync::Arc};

use agent_control_core::{
    AgentSession, AgentStatus, CommandOutcome, ControlError, LocationRecord, LocationStore,
    Notification, NotificationHub, PeerMessage, PeerSender, SessionId,
    model::maps_url,
    payload::{CommandResponsePayload, HeartbeatPayload, LocationFix, RegisterPayload},
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    registry::{Registry, SessionUpdate},
    tracker::CommandTracker,
};

/// Lifecycle of one connection as seen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Transport connected, registration not yet accepted.
    Unregistered,
    /// Registered; carries the current liveness classification.
    Registered(AgentStatus),
    Disconnected,
}

#[derive(Debug, Clone)]
struct Connection {
    remote_address: Option<String>,
}

/// Applies inbound agent events to shared state.
pub struct EventRouter {
    registry: Arc<Registry>,
    tracker: Arc<CommandTracker>,
    hub: Arc<NotificationHub>,
    peers: Arc<dyn PeerSender>,
    store: Arc<dyn LocationStore>,
    connections: RwLock<HashMap<SessionId, Connection>>,
}

impl EventRouter {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        tracker: Arc<CommandTracker>,
        hub: Arc<NotificationHub>,
        peers: Arc<dyn PeerSender>,
        store: Arc<dyn LocationStore>,
    ) -> Self {
        Self {
            registry,
            tracker,
            hub,
            peers,
            store,
            connections: RwLock::new(HashMap::new()),
        }
    }

    async fn reply(&self, session_id: &str, message: PeerMessage) {
        if let Err(e) = self.peers.send_to(session_id, message).await {
            tracing::debug!(sid = session_id, "reply not delivered: {e}");
        }
    }

    /// Current lifecycle state of a connection.
    pub async fn lifecycle(&self, session_id: &str) -> LifecycleState {
        if let Some(session) = self.registry.get(session_id).await {
            let status = self
                .registry
                .thresholds()
                .classify(session.last_seen, Utc::now());
            return LifecycleState::Registered(status);
        }
        if self.connections.read().await.contains_key(session_id) {
            LifecycleState::Unregistered
        } else {
            LifecycleState::Disconnected
        }
    }

    /// Transport connected. Acknowledges immediately, before registration.
    pub async fn connect(&self, session_id: &str, remote_address: Option<String>) {
        tracing::info!(
            sid = session_id,
            ip = remote_address.as_deref().unwrap_or("N/A"),
            "client attempting to connect"
        );
        self.connections
            .write()
            .await
            .insert(session_id.to_string(), Connection { remote_address });
        self.reply(session_id, PeerMessage::connection_acknowledged(session_id))
            .await;
    }

    /// Handle `register_device`.
    ///
    /// # Errors
    /// Returns `MissingIdentity` when the payload has no usable device id. The
    /// peer has already been sent `registration_failed` in that case.
    pub async fn register_device(
        &self,
        session_id: &str,
        payload: RegisterPayload,
    ) -> Result<AgentSession, ControlError> {
        let Some(device_id) = payload.device_id() else {
            let err = ControlError::MissingIdentity;
            tracing::error!(sid = session_id, ?payload, "registration failed: {err}");
            self.reply(
                session_id,
                PeerMessage::RegistrationFailed {
                    message: err.to_string(),
                },
            )
            .await;
            return Err(err);
        };

        let display_name = payload
            .device_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_display_name(session_id));
        let platform = payload
            .platform
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        let remote_address = self
            .connections
            .read()
            .await
            .get(session_id)
            .and_then(|c| c.remote_address.clone());

        let session = match self
            .registry
            .register(session_id, &device_id, &display_name, &platform, remote_address)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                tracing::error!(sid = session_id, "registration failed: {err}");
                self.reply(
                    session_id,
                    PeerMessage::RegistrationFailed {
                        message: err.to_string(),
                    },
                )
                .await;
                return Err(err);
            }
        };

        tracing::info!(
            device_id = %session.device_id,
            name = %session.display_name,
            sid = session_id,
            ip = session.network_address.as_deref().unwrap_or("N/A"),
            "device registered"
        );
        self.reply(
            session_id,
            PeerMessage::RegistrationSuccessful {
                message: "Successfully registered with control server.".to_string(),
                sid: session_id.to_string(),
                timestamp: Utc::now(),
            },
        )
        .await;
        Ok(session)
    }

    /// Handle `device_heartbeat`.
    ///
    /// An unknown or unregistered session is asked to register again and no
    /// registry entry is created.
    pub async fn heartbeat(
        &self,
        session_id: &str,
        payload: HeartbeatPayload,
    ) -> Option<AgentSession> {
        let update = SessionUpdate {
            status: payload.status(),
            battery: payload.battery,
            network_quality: payload.network,
        };

        let Some(session) = self.registry.touch(session_id, update).await else {
            tracing::warn!(
                sid = session_id,
                "heartbeat from unknown/unregistered session; requesting registration"
            );
            self.reply(session_id, PeerMessage::RequestRegistrationInfo {})
                .await;
            return None;
        };

        self.reply(
            session_id,
            PeerMessage::HeartbeatAck {
                timestamp: Utc::now(),
            },
        )
        .await;
        Some(session)
    }

    /// Handle `command_response`.
    ///
    /// Completes the tracked command if it is still pending, updates the
    /// responding session's counters, persists location fixes and re-broadcasts
    /// the normalised result. A response whose command already settled, by
    /// timeout or by an earlier response, is broadcast as `late_command_result`
    /// and does not touch the counters, so a command produces exactly one
    /// `command_result` or `command_timeout`. Settled ids are remembered for
    /// the tracker's retention window only; past it a response counts as
    /// untracked.
    pub async fn command_response(
        &self,
        session_id: &str,
        payload: CommandResponsePayload,
    ) -> Notification {
        let now = Utc::now();
        let CommandResponsePayload {
            command,
            command_id,
            status,
            payload: body,
        } = payload.clone();

        let (tracked, settled) = match command_id.as_deref() {
            Some(id) => match self.tracker.complete(id).await {
                Some(tracked) => (Some(tracked), None),
                None => (None, self.tracker.settled(id).await),
            },
            None => (None, None),
        };
        let late = settled.is_some();
        if let Some(settled) = settled {
            tracing::warn!(
                command_id = command_id.as_deref().unwrap_or("-"),
                sid = session_id,
                ?settled,
                "response for a command that already settled"
            );
        }

        if let Some(tracked) = &tracked {
            if tracked.target_session_id != session_id {
                tracing::warn!(
                    command_id = %tracked.command_id,
                    expected = %tracked.target_session_id,
                    sid = session_id,
                    "response arrived from a different session than the target"
                );
            }
        }

        let session = self
            .registry
            .record_response(session_id, payload.kind(), !late)
            .await;
        let device_id = session
            .map(|s| s.device_id)
            .or_else(|| tracked.as_ref().map(|t| t.target_device_id.clone()))
            .unwrap_or_else(|| format!("SID_{session_id}"));

        let body = if payload.is_location_report() {
            self.record_location(&device_id, body, now).await
        } else {
            body
        };

        tracing::info!(
            command = %command,
            command_id = command_id.as_deref().unwrap_or("-"),
            device_id = %device_id,
            status = %status,
            late,
            "command response"
        );

        let outcome = CommandOutcome {
            device_id,
            command,
            command_id,
            status,
            payload: body,
            timestamp: now,
        };
        let notification = if late {
            Notification::LateCommandResult(outcome)
        } else {
            Notification::CommandResult(outcome)
        };
        self.hub.push(notification.clone());
        notification
    }

    /// Persist a location fix and return the payload enriched with a map link.
    /// Malformed coordinates are logged and the payload is returned untouched.
    async fn record_location(&self, device_id: &str, mut body: Value, now: DateTime<Utc>) -> Value {
        let fix = match LocationFix::from_payload(&body) {
            Ok(Some(fix)) => fix,
            Ok(None) => return body,
            Err(e) => {
                tracing::warn!(device_id, "dropping location report: {e}");
                return body;
            }
        };

        if let Value::Object(map) = &mut body {
            map.insert(
                "maps_url".to_string(),
                Value::String(maps_url(fix.latitude, fix.longitude)),
            );
        }

        let record = LocationRecord {
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            source_timestamp: fix.source_timestamp.unwrap_or_else(|| now.to_rfc3339()),
            recorded_at: now,
        };
        match self.store.append_location(device_id, record).await {
            Ok(()) => tracing::info!(device_id, "location saved"),
            Err(e) => tracing::error!(device_id, "error saving location: {e}"),
        }
        body
    }

    /// Transport closed.
    ///
    /// Removes the registry entry if the session had registered; from the
    /// unregistered state this only forgets the connection.
    pub async fn disconnect(&self, session_id: &str) -> Option<AgentSession> {
        let connection = self.connections.write().await.remove(session_id);
        let removed = self.registry.remove(session_id).await;
        match &removed {
            Some(session) => tracing::info!(
                device_id = %session.device_id,
                sid = session_id,
                ip = session.network_address.as_deref().unwrap_or("N/A"),
                "device disconnected"
            ),
            None => tracing::warn!(
                sid = session_id,
                ip = connection
                    .and_then(|c| c.remote_address)
                    .as_deref()
                    .unwrap_or("N/A"),
                "unknown client disconnected"
            ),
        }
        removed
    }
}

fn default_display_name(session_id: &str) -> String {
    let prefix: String = session_id.chars().take(6).collect();
    format!("Device_{prefix}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agent_control_core::{CommandArgs, CommandCatalog, StatusThresholds};
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        dispatch::{Dispatcher, TimeoutPolicy},
        outbox::PeerOutbox,
        storage::MemoryLocationStore,
    };

    struct Fixture {
        router: EventRouter,
        dispatcher: Dispatcher,
        registry: Arc<Registry>,
        tracker: Arc<CommandTracker>,
        hub: Arc<NotificationHub>,
        outbox: Arc<PeerOutbox>,
        store: Arc<MemoryLocationStore>,
    }

    fn fixture() -> Fixture {
        let hub = Arc::new(NotificationHub::default());
        let registry = Arc::new(Registry::new(Arc::clone(&hub), StatusThresholds::default()));
        let tracker = Arc::new(CommandTracker::new());
        let outbox = Arc::new(PeerOutbox::new());
        let store = Arc::new(MemoryLocationStore::new());
        let router = EventRouter::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&hub),
            Arc::clone(&outbox) as Arc<dyn PeerSender>,
            Arc::clone(&store) as Arc<dyn LocationStore>,
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&outbox) as Arc<dyn PeerSender>,
            Arc::clone(&hub),
            CommandCatalog::new(),
            TimeoutPolicy::default(),
        );
        Fixture {
            router,
            dispatcher,
            registry,
            tracker,
            hub,
            outbox,
            store,
        }
    }

    fn register_payload(device_id: &str) -> RegisterPayload {
        serde_json::from_value(json!({
            "deviceId": device_id,
            "deviceName": "Pixel 8",
            "platform": "android",
        }))
        .unwrap()
    }

    fn response(value: Value) -> CommandResponsePayload {
        serde_json::from_value(value).unwrap()
    }

    async fn connect(f: &Fixture, sid: &str) -> mpsc::UnboundedReceiver<PeerMessage> {
        let rx = f.outbox.attach(sid).await;
        f.router.connect(sid, Some("10.0.0.7".into())).await;
        rx
    }

    #[tokio::test]
    async fn test_connect_acknowledges_before_registration() {
        let f = fixture();
        let mut rx = connect(&f, "s1").await;

        assert_eq!(rx.recv().await, Some(PeerMessage::connection_acknowledged("s1")));
        assert_eq!(f.router.lifecycle("s1").await, LifecycleState::Unregistered);
        assert!(f.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_register_device_lifecycle() {
        let f = fixture();
        let mut rx = connect(&f, "s1").await;
        rx.recv().await.unwrap();

        let session = f
            .router
            .register_device("s1", register_payload("d1"))
            .await
            .unwrap();
        assert_eq!(session.network_address.as_deref(), Some("10.0.0.7"));
        assert!(matches!(
            rx.recv().await,
            Some(PeerMessage::RegistrationSuccessful { sid, .. }) if sid == "s1"
        ));
        assert_eq!(
            f.router.lifecycle("s1").await,
            LifecycleState::Registered(AgentStatus::Active)
        );

        f.router.disconnect("s1").await.unwrap();
        assert_eq!(f.router.lifecycle("s1").await, LifecycleState::Disconnected);
        assert!(!f.registry.contains("s1").await);
    }

    #[tokio::test]
    async fn test_register_without_device_id_fails() {
        let f = fixture();
        let mut rx = connect(&f, "s1").await;
        rx.recv().await.unwrap();

        let err = f
            .router
            .register_device("s1", serde_json::from_value(json!({"deviceName": "x"})).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, ControlError::MissingIdentity);
        assert!(matches!(rx.recv().await, Some(PeerMessage::RegistrationFailed { .. })));
        assert_eq!(f.router.lifecycle("s1").await, LifecycleState::Unregistered);
    }

    #[tokio::test]
    async fn test_register_defaults() {
        let f = fixture();
        let _rx = connect(&f, "abcdefgh").await;
        let session = f
            .router
            .register_device(
                "abcdefgh",
                serde_json::from_value(json!({"deviceId": "d9"})).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(session.display_name, "Device_abcdef");
        assert_eq!(session.platform, "Unknown");
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_session_requests_registration() {
        let f = fixture();
        let mut rx = connect(&f, "s1").await;
        rx.recv().await.unwrap();

        assert!(f.router.heartbeat("s1", HeartbeatPayload::default()).await.is_none());
        assert_eq!(rx.recv().await, Some(PeerMessage::RequestRegistrationInfo {}));
        assert!(f.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_heartbeat_acks_and_broadcasts() {
        let f = fixture();
        let mut rx = connect(&f, "s1").await;
        f.router.register_device("s1", register_payload("d1")).await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        let payload: HeartbeatPayload =
            serde_json::from_value(json!({"battery": 55, "network": "lte"})).unwrap();
        let session = f.router.heartbeat("s1", payload).await.unwrap();
        assert_eq!(session.telemetry.battery, Some(json!(55)));
        assert!(matches!(rx.recv().await, Some(PeerMessage::HeartbeatAck { .. })));
        assert!(matches!(
            f.hub.history().last(),
            Some(Notification::ClientStatusUpdate { sid, .. }) if sid == "s1"
        ));
    }

    #[tokio::test]
    async fn test_location_response_appends_one_record() {
        let f = fixture();
        let _rx = connect(&f, "s1").await;
        f.router.register_device("s1", register_payload("d1")).await.unwrap();

        let result = f
            .dispatcher
            .dispatch("s1", "get_location", CommandArgs::new(), Some(5))
            .await;
        let command_id = result.command_id().unwrap().to_string();

        let notification = f
            .router
            .command_response(
                "s1",
                response(json!({
                    "command": "get_location",
                    "command_id": command_id,
                    "status": "success",
                    "payload": {"latitude": 1.0, "longitude": 2.0},
                })),
            )
            .await;

        let history = f.store.history("d1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert!((history[0].latitude - 1.0).abs() < f64::EPSILON);
        assert!((history[0].longitude - 2.0).abs() < f64::EPSILON);

        let Notification::CommandResult(outcome) = notification else {
            panic!("expected command_result");
        };
        assert_eq!(outcome.device_id, "d1");
        assert_eq!(
            outcome.payload["maps_url"],
            "https://www.google.com/maps?q=1,2"
        );

        let counters = f.registry.get("s1").await.unwrap().counters;
        assert_eq!(counters.commands_sent, 1);
        assert_eq!(counters.commands_succeeded, 1);
        assert_eq!(f.tracker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_location_is_broadcast_without_record() {
        let f = fixture();
        let _rx = connect(&f, "s1").await;
        f.router.register_device("s1", register_payload("d1")).await.unwrap();

        let notification = f
            .router
            .command_response(
                "s1",
                response(json!({
                    "command": "command_get_location",
                    "status": "success",
                    "payload": {"latitude": "north", "longitude": 2.0},
                })),
            )
            .await;

        assert!(f.store.history("d1").await.unwrap().is_empty());
        let Notification::CommandResult(outcome) = notification else {
            panic!("expected command_result");
        };
        assert!(outcome.payload.get("maps_url").is_none());
    }

    #[tokio::test]
    async fn test_failed_response_counts_failure() {
        let f = fixture();
        let _rx = connect(&f, "s1").await;
        f.router.register_device("s1", register_payload("d1")).await.unwrap();

        f.router
            .command_response("s1", response(json!({"command": "ping", "status": "failed"})))
            .await;
        assert_eq!(f.registry.get("s1").await.unwrap().counters.commands_failed, 1);
    }

    #[tokio::test]
    async fn test_response_from_unregistered_session_uses_fallback_id() {
        let f = fixture();
        let notification = f
            .router
            .command_response("zz", response(json!({"command": "ping", "status": "success"})))
            .await;
        let Notification::CommandResult(outcome) = notification else {
            panic!("expected command_result");
        };
        assert_eq!(outcome.device_id, "SID_zz");
        assert!(f.registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_timeout() {
        let f = fixture();
        let _rx = connect(&f, "s1").await;
        f.router.register_device("s1", register_payload("d1")).await.unwrap();

        let result = f
            .dispatcher
            .dispatch("s1", "ping", CommandArgs::new(), Some(1))
            .await;
        let command_id = result.command_id().unwrap().to_string();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let notification = f
            .router
            .command_response(
                "s1",
                response(json!({"command": "ping", "command_id": command_id, "status": "success"})),
            )
            .await;
        assert!(matches!(notification, Notification::LateCommandResult(_)));

        let counters = f.registry.get("s1").await.unwrap().counters;
        assert_eq!(counters.commands_failed, 1);
        assert_eq!(counters.commands_succeeded, 0);

        let terminal: Vec<_> = f
            .hub
            .history()
            .into_iter()
            .filter(|n| n.command_id() == Some(command_id.as_str()))
            .filter(|n| {
                matches!(
                    n,
                    Notification::CommandResult(_) | Notification::CommandTimeout { .. }
                )
            })
            .collect();
        assert_eq!(terminal.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_response_is_not_counted_twice() {
        let f = fixture();
        let _rx = connect(&f, "s1").await;
        f.router.register_device("s1", register_payload("d1")).await.unwrap();

        let result = f
            .dispatcher
            .dispatch("s1", "ping", CommandArgs::new(), Some(30))
            .await;
        let command_id = result.command_id().unwrap().to_string();
        let frame = json!({"command": "ping", "command_id": command_id, "status": "success"});

        let first = f.router.command_response("s1", response(frame.clone())).await;
        let second = f.router.command_response("s1", response(frame)).await;
        assert!(matches!(first, Notification::CommandResult(_)));
        assert!(matches!(second, Notification::LateCommandResult(_)));

        let counters = f.registry.get("s1").await.unwrap().counters;
        assert_eq!(counters.commands_succeeded, 1);
        let results = f
            .hub
            .history()
            .into_iter()
            .filter(|n| matches!(n, Notification::CommandResult(_)))
            .count();
        assert_eq!(results, 1);
    }

    #[tokio::test]
    async fn test_disconnect_unregistered_is_transport_only() {
        let f = fixture();
        let _rx = connect(&f, "s1").await;
        let before = f.hub.history().len();

        assert!(f.router.disconnect("s1").await.is_none());
        assert_eq!(f.hub.history().len(), before);
        assert_eq!(f.router.lifecycle("s1").await, LifecycleState::Disconnected);
    }
}
