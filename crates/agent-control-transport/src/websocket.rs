//! WebSocket transport for agents and observers.
//!
//! `/agent` carries the agent protocol: each connection gets a fresh session
//! id and a writer task draining its outbox queue. `/observe` greets with the
//! current client list, replays recent notifications and then streams live
//! ones.
//!
//! Observer events are `client_connected`, `client_disconnected`,
//! `client_status_update`, `command_sent`, `command_result` and
//! `command_timeout`, plus `late_command_result`. The last one carries the
//! same body as `command_result` and is sent for a response whose command had
//! already timed out or been answered, so each command still yields exactly
//! one `command_result` or `command_timeout`.

use std::{net::SocketAddr, sync::Arc};

use agent_control_core::{PeerMessage, PeerSender};
use agent_control_session::ControlManager;
use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, Utf8Bytes, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::{
    api,
    protocol::{self, AgentEvent},
};

/// Build the full application router: agent socket, observer socket and the
/// operator HTTP API.
#[must_use]
pub fn create_router(manager: Arc<ControlManager>) -> Router {
    Router::new()
        .route("/agent", get(agent_ws_handler))
        .route("/observe", get(observer_ws_handler))
        .merge(api::api_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

/// Agent socket upgrade handler.
pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(manager): State<Arc<ControlManager>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, manager, addr))
}

/// Observer socket upgrade handler.
pub async fn observer_ws_handler(
    ws: WebSocketUpgrade,
    State(manager): State<Arc<ControlManager>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_observer_socket(socket, manager))
}

fn frame_text(msg: Message) -> Option<Utf8Bytes> {
    match msg {
        Message::Text(text) => Some(text),
        Message::Binary(data) => String::from_utf8(data.to_vec()).ok().map(Into::into),
        _ => None,
    }
}

async fn handle_agent_socket(socket: WebSocket, manager: Arc<ControlManager>, addr: SocketAddr) {
    let session_id = Uuid::new_v4().simple().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut outbound = manager.outbox().attach(&session_id).await;
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let json = match protocol::encode_peer(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("{e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    manager
        .router()
        .connect(&session_id, Some(addr.ip().to_string()))
        .await;

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Close(_)) => break,
            Ok(msg) => match frame_text(msg) {
                Some(text) => text,
                None => continue,
            },
            Err(e) => {
                tracing::error!(sid = %session_id, "WebSocket error: {e}");
                break;
            }
        };
        apply_frame(&manager, &session_id, text.as_str()).await;
    }

    let state = manager.router().lifecycle(&session_id).await;
    tracing::debug!(sid = %session_id, ?state, "agent socket closed");
    manager.router().disconnect(&session_id).await;
    manager.outbox().detach(&session_id).await;
    send_task.abort();
}

/// Decode one agent frame and route it.
///
/// A frame that cannot be decoded is answered with an `error` event and the
/// connection stays open.
pub async fn apply_frame(manager: &ControlManager, session_id: &str, text: &str) {
    let event = match AgentEvent::decode(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(sid = session_id, "invalid agent frame: {e}");
            let reply = PeerMessage::Error {
                message: e.to_string(),
            };
            if let Err(e) = manager.outbox().send_to(session_id, reply).await {
                tracing::debug!(sid = session_id, "error reply not delivered: {e}");
            }
            return;
        }
    };

    tracing::debug!(sid = session_id, event = event.name(), "agent event");
    let router = manager.router();
    match event {
        AgentEvent::RegisterDevice(payload) => {
            // Failures are already reported to the peer.
            let _ = router.register_device(session_id, payload).await;
        }
        AgentEvent::DeviceHeartbeat(payload) => {
            router.heartbeat(session_id, payload).await;
        }
        AgentEvent::CommandResponse(payload) => {
            router.command_response(session_id, payload).await;
        }
    }
}

async fn handle_observer_socket(socket: WebSocket, manager: Arc<ControlManager>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Subscribe before reading the snapshot so nothing falls between the two.
    let mut notifications = manager.notifications();
    let clients = manager.list_active_agents().await;
    match protocol::encode_client_list(&clients) {
        Ok(json) => {
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        Err(e) => tracing::error!("{e}"),
    }
    tracing::info!(clients = clients.len(), "observer connected");

    loop {
        tokio::select! {
            notification = notifications.next() => {
                let Some(notification) = notification else { break };
                let json = match protocol::encode_notification(&notification) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("{e}");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    tracing::info!("observer disconnected");
}
