//! Periodic status sweep.
//!
//! Heartbeats only reclassify the session that sent them, so a silent agent
//! would stay `active` forever. The sweep reclassifies everyone on a fixed
//! cadence and lets observers see agents drift to `idle` and `stale`.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::registry::Registry;

/// Spawn the sweep. A zero interval disables it and returns `None`.
pub fn spawn_status_monitor(registry: Arc<Registry>, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let changed = registry.refresh_statuses(Utc::now()).await;
            if !changed.is_empty() {
                tracing::debug!(count = changed.len(), "session statuses changed");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use agent_control_core::{AgentStatus, Notification, NotificationHub, StatusThresholds};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_reclassifies_silent_sessions() {
        let hub = Arc::new(NotificationHub::default());
        let thresholds = StatusThresholds {
            active_secs: 0,
            idle_secs: 0,
        };
        let registry = Arc::new(Registry::new(Arc::clone(&hub), thresholds));
        registry.register("s1", "d1", "n", "android", None).await.unwrap();

        let handle =
            spawn_status_monitor(Arc::clone(&registry), Duration::from_secs(15)).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(registry.get("s1").await.unwrap().status, AgentStatus::Stale);
        assert!(matches!(
            hub.history().last(),
            Some(Notification::ClientStatusUpdate { status: AgentStatus::Stale, .. })
        ));
        handle.abort();
    }

    #[tokio::test]
    async fn test_zero_interval_disables_sweep() {
        let hub = Arc::new(NotificationHub::default());
        let registry = Arc::new(Registry::new(hub, StatusThresholds::default()));
        assert!(spawn_status_monitor(registry, Duration::ZERO).is_none());
    }
}
