//! Connection registry, command tracking and event routing for remote agents.
//!
//! Provides:
//! - `Registry` - Registered sessions and their liveness
//! - `CommandTracker` - In-flight commands and their terminal transitions
//! - `Dispatcher` - Operator commands with per-command timeouts
//! - `EventRouter` - Inbound agent events
//! - `ControlManager` - Wires the above together
//! - Location storage implementations (memory, JSON files)

pub mod dispatch;
pub mod manager;
pub mod monitor;
pub mod outbox;
pub mod registry;
pub mod router;
pub mod storage;
pub mod tracker;

pub use dispatch::{DispatchResult, Dispatcher, TimeoutPolicy};
pub use manager::{ControlConfig, ControlManager};
pub use outbox::PeerOutbox;
pub use registry::{Registry, SessionUpdate};
pub use router::{EventRouter, LifecycleState};
pub use tracker::CommandTracker;
