//! Transport layer for connected agents and operators.
//!
//! Provides:
//! - Wire protocol (`{"event": .., "data": ..}` JSON frames)
//! - Agent and observer websockets plus the operator HTTP API (feature: websocket)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod api;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{AgentEvent, ProtocolError};

#[cfg(feature = "websocket")]
pub use websocket::create_router;
