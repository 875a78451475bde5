//! Per-connection outbound queues.

use std::collections::HashMap;

use agent_control_core::{PeerMessage, PeerSender, SendError, SessionId};
use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

/// Routes [`PeerMessage`]s to the writer task of each open connection.
#[derive(Default)]
pub struct PeerOutbox {
    peers: RwLock<HashMap<SessionId, mpsc::UnboundedSender<PeerMessage>>>,
}

impl PeerOutbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a queue for `session_id`, replacing any previous one.
    pub async fn attach(&self, session_id: &str) -> mpsc::UnboundedReceiver<PeerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().await.insert(session_id.to_string(), tx);
        rx
    }

    /// Close the queue for `session_id`.
    pub async fn detach(&self, session_id: &str) {
        self.peers.write().await.remove(session_id);
    }
}

#[async_trait]
impl PeerSender for PeerOutbox {
    async fn send_to(&self, session_id: &str, message: PeerMessage) -> Result<(), SendError> {
        let peers = self.peers.read().await;
        let tx = peers
            .get(session_id)
            .ok_or_else(|| SendError::PeerNotConnected(session_id.to_string()))?;
        tx.send(message).map_err(|_| SendError::ChannelClosed)
    }
}
