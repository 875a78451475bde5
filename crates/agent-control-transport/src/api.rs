//! HTTP handlers for the operator API.
//!
//! - GET  /api/clients: registered agents, sorted
//! - POST /api/clients/{sid}/command: dispatch a command
//! - GET  /api/devices/{device_id}/locations: stored location history

use std::sync::Arc;

use agent_control_core::{CommandArgs, ControlError, StoreError};
use agent_control_session::{ControlManager, DispatchResult};
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

/// Routes for the operator API, to be merged into the application router.
pub fn api_router() -> Router<Arc<ControlManager>> {
    Router::new()
        .route("/api/clients", get(list_clients))
        .route("/api/clients/{sid}/command", post(send_command))
        .route("/api/devices/{device_id}/locations", get(device_locations))
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    command: Option<String>,
    #[serde(default)]
    args: Value,
    timeout: Option<u64>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(DispatchResult::Error {
            message: message.into(),
        }),
    )
        .into_response()
}

async fn list_clients(State(manager): State<Arc<ControlManager>>) -> Json<Value> {
    let clients = manager.list_active_agents().await;
    Json(json!({
        "status": "success",
        "count": clients.len(),
        "clients": clients,
    }))
}

async fn send_command(
    State(manager): State<Arc<ControlManager>>,
    Path(sid): Path<String>,
    body: Result<Json<CommandRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(e) => {
            tracing::warn!(sid = %sid, "rejected command request: {e}");
            return error_response(StatusCode::BAD_REQUEST, "Missing or invalid JSON body.");
        }
    };

    let Some(command) = request.command.filter(|c| !c.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'command' in request body.");
    };
    let args = match CommandArgs::from_value(request.args) {
        Ok(args) => args,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match manager
        .try_send_command(&sid, command.trim(), args, request.timeout)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e @ ControlError::TargetNotConnected { .. }) => {
            error_response(StatusCode::NOT_FOUND, e.to_string())
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn device_locations(
    State(manager): State<Arc<ControlManager>>,
    Path(device_id): Path<String>,
) -> Response {
    match manager.location_history(&device_id).await {
        Ok(locations) => Json(json!({
            "status": "success",
            "device_id": device_id,
            "count": locations.len(),
            "locations": locations,
        }))
        .into_response(),
        Err(e @ StoreError::InvalidDeviceId(_)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            tracing::error!(device_id = %device_id, "failed to read location history: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_control_core::payload::RegisterPayload;
    use agent_control_session::{ControlConfig, storage::MemoryLocationStore};
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;

    async fn make_app() -> (Router, Arc<ControlManager>) {
        let manager = Arc::new(ControlManager::new(
            ControlConfig::default(),
            Arc::new(MemoryLocationStore::new()),
        ));
        let app = api_router().with_state(Arc::clone(&manager));
        (app, manager)
    }

    async fn register(manager: &ControlManager, sid: &str, device_id: &str) {
        let payload: RegisterPayload =
            serde_json::from_value(json!({"deviceId": device_id})).unwrap();
        manager.router().register_device(sid, payload).await.unwrap();
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 64)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_clients() {
        let (app, manager) = make_app().await;
        register(&manager, "s1", "d1").await;

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/clients")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["count"], 1);
        assert_eq!(json["clients"][0]["device_id"], "d1");
        assert_eq!(json["clients"][0]["time_since_last_seen"], 0);
    }

    #[tokio::test]
    async fn test_send_command_ok() {
        let (app, manager) = make_app().await;
        let _rx = manager.outbox().attach("s1").await;
        register(&manager, "s1", "d1").await;

        let resp = app
            .oneshot(post_json(
                "/api/clients/s1/command",
                &json!({"command": "get_device_info", "timeout": 10}),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "sent");
        assert!(
            json["command_id"]
                .as_str()
                .unwrap()
                .starts_with("get_device_info_")
        );
        assert_eq!(manager.pending_commands().await[0].timeout_secs, 10);
    }

    #[tokio::test]
    async fn test_send_command_unknown_target() {
        let (app, _manager) = make_app().await;
        let resp = app
            .oneshot(post_json("/api/clients/ghost/command", &json!({"command": "ping"})))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "error");
        assert!(json["message"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_send_command_missing_name() {
        let (app, manager) = make_app().await;
        register(&manager, "s1", "d1").await;

        let resp = app
            .oneshot(post_json("/api/clients/s1/command", &json!({"args": {}})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(manager.snapshot().await[0].counters.commands_sent, 0);
    }

    #[tokio::test]
    async fn test_send_command_without_body() {
        let (app, _manager) = make_app().await;
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/clients/s1/command")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_command_rejects_non_object_args() {
        let (app, manager) = make_app().await;
        register(&manager, "s1", "d1").await;

        let resp = app
            .oneshot(post_json(
                "/api/clients/s1/command",
                &json!({"command": "list_files", "args": [1, 2]}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_device_locations() {
        let (app, manager) = make_app().await;
        register(&manager, "s1", "d1").await;
        let payload = serde_json::from_value(json!({
            "command": "get_location",
            "status": "success",
            "payload": {"latitude": 1.0, "longitude": 2.0, "accuracy": 4.0},
        }))
        .unwrap();
        manager.router().command_response("s1", payload).await;

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/devices/d1/locations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["locations"][0]["accuracy"], 4.0);
    }
}
