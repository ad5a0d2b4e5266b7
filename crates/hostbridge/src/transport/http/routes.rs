//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::registry::ToolInfo;
use crate::service::{BridgeService, ServiceSnapshot};

/// Body of `POST /rpc/execute_tool`.
///
/// `arguments_json` is a JSON document carried as a string, so RPC clients
/// that only speak strings can still pass structured arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteToolRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments_json: String,
}

/// The response is the wire response serialized to a string, returned as a
/// JSON string. Failures are still HTTP 200; the caller inspects `success`.
async fn execute_tool<S: 'static>(
    State(service): State<Arc<BridgeService<S>>>,
    body: Option<Json<ExecuteToolRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "expected {\"tool_name\": ..., \"arguments_json\": ...}"
            })),
        );
    };

    let outcome = service
        .execute_json(&request.tool_name, &request.arguments_json)
        .await;

    match serde_json::to_string(&outcome.into_wire()) {
        Ok(encoded) => (StatusCode::OK, Json(serde_json::Value::String(encoded))),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

async fn list_tools<S: 'static>(State(service): State<Arc<BridgeService<S>>>) -> Json<Vec<String>> {
    Json(service.registry().names())
}

async fn tool_infos<S: 'static>(
    State(service): State<Arc<BridgeService<S>>>,
) -> Json<Vec<ToolInfo>> {
    Json(service.registry().infos())
}

async fn health_check<S: 'static>(
    State(service): State<Arc<BridgeService<S>>>,
) -> Json<ServiceSnapshot> {
    Json(service.snapshot())
}

async fn shutdown<S: 'static>(State(service): State<Arc<BridgeService<S>>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

pub fn routes<S: 'static>(service: Arc<BridgeService<S>>) -> Router {
    Router::new()
        .route("/rpc/execute_tool", post(execute_tool::<S>))
        .route("/tools", get(list_tools::<S>))
        .route("/tools/info", get(tool_infos::<S>))
        .route("/health-check", get(health_check::<S>))
        .route("/shutdown", post(shutdown::<S>))
        .with_state(service)
}
