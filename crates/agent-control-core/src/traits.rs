//! Collaborator traits: location persistence and peer delivery.

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    model::{LocationRecord, SessionId},
    peer::PeerMessage,
};

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid device id for storage: {0}")]
    InvalidDeviceId(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Trait for location history backends.
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Append one record to a device's history.
    async fn append_location(
        &self,
        device_id: &str,
        record: LocationRecord,
    ) -> Result<(), StoreError>;

    /// Full history for a device, oldest first. Unknown devices yield an empty list.
    async fn history(&self, device_id: &str) -> Result<Vec<LocationRecord>, StoreError>;
}

/// Delivery error.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Peer not connected: {0}")]
    PeerNotConnected(SessionId),
    #[error("Channel closed")]
    ChannelClosed,
}

/// Trait for delivering messages to a single connected peer.
#[async_trait]
pub trait PeerSender: Send + Sync {
    /// Queue a message for the peer behind `session_id`.
    async fn send_to(&self, session_id: &str, message: PeerMessage) -> Result<(), SendError>;
}
