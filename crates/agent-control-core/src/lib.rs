//! Core abstractions for remote agent control.
//!
//! This crate provides the fundamental building blocks:
//! - `AgentSession` / `InFlightCommand` / `LocationRecord` - Domain records
//! - `Notification` - Typed observer notification enum
//! - `NotificationHub` - Broadcast + history for observer reconnection
//! - `PeerMessage` - Messages addressed to a single connected agent
//! - `CommandArgs` / `CommandCatalog` - Command arguments and their validation
//! - Status classification and collaborator traits

pub mod args;
pub mod error;
pub mod hub;
pub mod model;
pub mod notification;
pub mod payload;
pub mod peer;
pub mod status;
pub mod traits;

pub use args::{CommandArgs, CommandCatalog};
pub use error::ControlError;
pub use hub::NotificationHub;
pub use model::{
    AgentSession, AgentSnapshot, CommandCounters, CommandId, CommandStatus, InFlightCommand,
    LocationRecord, SessionId, Telemetry,
};
pub use notification::{CommandOutcome, Notification};
pub use peer::PeerMessage;
pub use status::{AgentStatus, StatusThresholds};
pub use traits::{LocationStore, PeerSender, SendError, StoreError};
