//! Control manager wiring the registry, tracker, dispatcher and router together.

use std::{sync::Arc, time::Duration};

use agent_control_core::{
    AgentSession, AgentSnapshot, CommandArgs, CommandCatalog, ControlError, InFlightCommand,
    LocationRecord, LocationStore, Notification, NotificationHub, PeerSender, StatusThresholds,
    StoreError, hub::DEFAULT_HISTORY_LIMIT,
};
use futures::stream::BoxStream;
use tokio::task::JoinHandle;

use crate::{
    dispatch::{DispatchResult, Dispatcher, TimeoutPolicy},
    monitor,
    outbox::PeerOutbox,
    registry::Registry,
    router::EventRouter,
    tracker::CommandTracker,
};

/// Tunables for a [`ControlManager`].
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub timeouts: TimeoutPolicy,
    pub thresholds: StatusThresholds,
    pub history_limit: usize,
    pub catalog: CommandCatalog,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutPolicy::default(),
            thresholds: StatusThresholds::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            catalog: CommandCatalog::new(),
        }
    }
}

/// Owns the shared control state and exposes the operator surface.
///
/// Transports feed agent events through [`ControlManager::router`] and deliver
/// outbound messages from the queues opened on [`ControlManager::outbox`].
pub struct ControlManager {
    registry: Arc<Registry>,
    tracker: Arc<CommandTracker>,
    hub: Arc<NotificationHub>,
    outbox: Arc<PeerOutbox>,
    store: Arc<dyn LocationStore>,
    dispatcher: Dispatcher,
    router: EventRouter,
}

impl ControlManager {
    /// Create a manager persisting location fixes to `store`.
    #[must_use]
    pub fn new(config: ControlConfig, store: Arc<dyn LocationStore>) -> Self {
        let hub = Arc::new(NotificationHub::new(config.history_limit));
        let registry = Arc::new(Registry::new(Arc::clone(&hub), config.thresholds));
        let tracker = Arc::new(CommandTracker::new());
        let outbox = Arc::new(PeerOutbox::new());
        let peers: Arc<dyn PeerSender> = Arc::clone(&outbox) as Arc<dyn PeerSender>;

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&peers),
            Arc::clone(&hub),
            config.catalog,
            config.timeouts,
        );
        let router = EventRouter::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&hub),
            peers,
            Arc::clone(&store),
        );

        Self {
            registry,
            tracker,
            hub,
            outbox,
            store,
            dispatcher,
            router,
        }
    }

    /// Registered sessions, most recently active first within each status.
    pub async fn list_active_agents(&self) -> Vec<AgentSnapshot> {
        self.registry.list_active().await
    }

    /// Send a command to a registered session.
    pub async fn send_command(
        &self,
        session_id: &str,
        command_name: &str,
        arguments: CommandArgs,
        timeout_secs: Option<u64>,
    ) -> DispatchResult {
        self.dispatcher
            .dispatch(session_id, command_name, arguments, timeout_secs)
            .await
    }

    /// Send a command, keeping the failure typed for callers that map it
    /// to their own status codes.
    ///
    /// # Errors
    /// See [`Dispatcher::try_dispatch`].
    pub async fn try_send_command(
        &self,
        session_id: &str,
        command_name: &str,
        arguments: CommandArgs,
        timeout_secs: Option<u64>,
    ) -> Result<DispatchResult, ControlError> {
        self.dispatcher
            .try_dispatch(session_id, command_name, arguments, timeout_secs)
            .await
    }

    /// Raw registry records, unordered.
    pub async fn snapshot(&self) -> Vec<AgentSession> {
        self.registry.list_all().await
    }

    /// Commands awaiting a response, oldest first.
    pub async fn pending_commands(&self) -> Vec<InFlightCommand> {
        self.tracker.pending().await
    }

    /// Stored location history of a device.
    ///
    /// # Errors
    /// Returns the store's error, including `InvalidDeviceId` for unsafe ids.
    pub async fn location_history(
        &self,
        device_id: &str,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        self.store.history(device_id).await
    }

    #[must_use]
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    #[must_use]
    pub fn outbox(&self) -> &Arc<PeerOutbox> {
        &self.outbox
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// Recent notification history followed by live notifications.
    #[must_use]
    pub fn notifications(&self) -> BoxStream<'static, Notification> {
        self.hub.history_plus_stream()
    }

    /// Start the periodic status sweep. A zero interval disables it.
    #[must_use]
    pub fn spawn_status_monitor(&self, interval: Duration) -> Option<JoinHandle<()>> {
        monitor::spawn_status_monitor(Arc::clone(&self.registry), interval)
    }
}

#[cfg(test)]
mod tests {
    use agent_control_core::{AgentStatus, PeerMessage, payload::RegisterPayload};
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::storage::MemoryLocationStore;

    /// Store that rejects every write.
    struct FailingStore;

    #[async_trait]
    impl LocationStore for FailingStore {
        async fn append_location(
            &self,
            _device_id: &str,
            _record: LocationRecord,
        ) -> Result<(), StoreError> {
            Err(StoreError::Internal("disk full".into()))
        }

        async fn history(&self, _device_id: &str) -> Result<Vec<LocationRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn manager() -> ControlManager {
        ControlManager::new(
            ControlConfig::default(),
            Arc::new(MemoryLocationStore::new()),
        )
    }

    async fn register(manager: &ControlManager, sid: &str, device_id: &str) {
        let payload: RegisterPayload =
            serde_json::from_value(json!({"deviceId": device_id, "deviceName": "phone"})).unwrap();
        manager.router().register_device(sid, payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_register_heartbeat_and_list() {
        let manager = manager();
        let _rx = manager.outbox().attach("s1").await;
        manager.router().connect("s1", None).await;
        register(&manager, "s1", "d1").await;
        manager
            .router()
            .heartbeat("s1", Default::default())
            .await
            .unwrap();

        let agents = manager.list_active_agents().await;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].session.status, AgentStatus::Active);
        assert_eq!(agents[0].session.counters.commands_sent, 0);
    }

    #[tokio::test]
    async fn test_send_command_round_trip() {
        let manager = manager();
        let mut rx = manager.outbox().attach("s1").await;
        register(&manager, "s1", "d1").await;
        rx.recv().await.unwrap();

        let result = manager
            .send_command("s1", "get_device_info", CommandArgs::new(), None)
            .await;
        let command_id = result.command_id().unwrap().to_string();
        assert!(matches!(
            rx.recv().await,
            Some(PeerMessage::Command { command_id: id, .. }) if id == command_id
        ));
        assert_eq!(manager.pending_commands().await.len(), 1);

        let payload = serde_json::from_value(json!({
            "command": "get_device_info",
            "command_id": command_id,
            "status": "success",
            "payload": {"model": "Pixel"},
        }))
        .unwrap();
        manager.router().command_response("s1", payload).await;
        assert!(manager.pending_commands().await.is_empty());
        assert_eq!(
            manager.snapshot().await[0].counters.commands_succeeded,
            1
        );
    }

    #[tokio::test]
    async fn test_notifications_replay_history() {
        use futures::StreamExt;

        let manager = manager();
        register(&manager, "s1", "d1").await;

        let mut stream = manager.notifications();
        let first = stream.next().await.unwrap();
        assert_eq!(first.event_name(), "client_connected");
    }

    #[tokio::test]
    async fn test_store_failure_still_broadcasts_result() {
        let manager = ControlManager::new(ControlConfig::default(), Arc::new(FailingStore));
        register(&manager, "s1", "d1").await;

        let payload = serde_json::from_value(json!({
            "command": "get_location",
            "status": "success",
            "payload": {"latitude": 1.5, "longitude": 2.5},
        }))
        .unwrap();
        let notification = manager.router().command_response("s1", payload).await;
        let Notification::CommandResult(outcome) = notification else {
            panic!("expected command_result");
        };
        assert!(outcome.payload.get("maps_url").is_some());
        assert!(manager.location_history("d1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_location_history_reads_store() {
        let manager = manager();
        register(&manager, "s1", "d1").await;
        let payload = serde_json::from_value(json!({
            "command": "command_get_location",
            "status": "success",
            "payload": {"latitude": "10.5", "longitude": "-3.25", "timestamp_gps": "t0"},
        }))
        .unwrap();
        manager.router().command_response("s1", payload).await;

        let history = manager.location_history("d1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].source_timestamp, "t0");
        tokio_test::assert_err!(manager.location_history("../x").await);
    }
}
