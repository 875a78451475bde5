//! Broadcast + history notification hub for observer reconnection.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::Notification;

/// Default number of notifications retained for late subscribers.
pub const DEFAULT_HISTORY_LIMIT: usize = 256;

const CHANNEL_CAPACITY: usize = 1024;

/// Notification hub with broadcast and history support.
///
/// Observers that (re)connect receive recent history first, then live
/// notifications. Pushes are serialized so history order matches broadcast order.
pub struct NotificationHub {
    history: RwLock<VecDeque<Notification>>,
    history_limit: usize,
    sender: broadcast::Sender<Notification>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl NotificationHub {
    /// Create a hub retaining at most `history_limit` notifications.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            history: RwLock::new(VecDeque::with_capacity(history_limit.min(64))),
            history_limit,
            sender,
        }
    }

    /// Push a notification to live observers and history.
    pub fn push(&self, notification: Notification) {
        let mut history = self
            .history
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        tracing::debug!(event = notification.event_name(), "notify");
        let _ = self.sender.send(notification.clone()); // no observers is fine

        if self.history_limit == 0 {
            return;
        }
        while history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(notification);
    }

    /// Get a receiver for live notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the retained history.
    #[must_use]
    pub fn history(&self) -> Vec<Notification> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live notifications.
    ///
    /// Lagged receivers skip the notifications they missed.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, Notification> {
        // Subscribe under the read lock so nothing lands between history and live.
        let (history, rx) = {
            let guard = self.history.read().unwrap_or_else(PoisonError::into_inner);
            (guard.iter().cloned().collect::<Vec<_>>(), self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::warn!("observer stream lagged: {e}");
                    None
                }
            }
        });

        Box::pin(hist.chain(live))
    }
}
