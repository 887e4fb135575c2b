//! HTTP surface: inbound webhook routes and the listener control API.

use crate::error::ApiError;
use axum::body::{Body, Bytes};
use axum::extract::{MatchedPath, Path, State};
use axum::http::{Request, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use missionctl_core::{TriggerNodeId, UserId, WorkflowId};
use missionctl_trigger::{
    ConfigField, InboundKey, ListenerSupervisor, RawStopRequest, ReconcileReport, TriggerFailure,
    TriggerKind, TriggerMetadata, TriggerNode, TriggerRuntime,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::Span;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<ListenerSupervisor>,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/triggers", get(list_triggers))
        .route(
            "/workflows/{workflow_id}/triggers",
            put(reconcile).delete(deactivate),
        )
        .route("/listeners/stop", post(stop_listener))
        .route(
            "/webhooks/sheets/{workflow_id}/{trigger_node_id}",
            post(sheet_callback),
        )
        .route("/webhooks/telegram/{access_token}", post(telegram_update))
        .route("/webhooks/workflows/{workflow_id}", post(workflow_webhook))
        .route("/chat/{workflow_id}", post(chat_message))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Request span keyed by the route template. Paths can carry bot tokens,
/// so the raw URI is never recorded.
fn request_span(request: &Request<Body>) -> Span {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or("unmatched", MatchedPath::as_str);
    tracing::debug_span!("request", method = %request.method(), route)
}

fn path_id<T: FromStr>(raw: &str, field: &str) -> Result<T, ApiError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| {
        ApiError(
            TriggerFailure::validation(format!("The '{field}' value is not a valid id."), e.to_string())
                .with_data("field", field),
        )
    })
}

/// Parses a webhook body. Non-JSON bodies are passed on as text.
fn body_value(body: &Bytes) -> JsonValue {
    if body.is_empty() {
        return JsonValue::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(body).into_owned()))
}

async fn dispatch(state: &AppState, key: InboundKey, body: JsonValue) -> Result<StatusCode, ApiError> {
    state
        .supervisor
        .runtime()
        .services()
        .router
        .dispatch(&key, body)
        .await
        .map_err(|e| ApiError(e.at("http.inbound")))?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerDescription {
    #[serde(flatten)]
    metadata: TriggerMetadata,
    config_schema: Vec<ConfigField>,
}

async fn list_triggers() -> Json<Vec<TriggerDescription>> {
    Json(
        TriggerKind::ALL
            .into_iter()
            .map(|kind| TriggerDescription {
                metadata: TriggerRuntime::metadata(kind),
                config_schema: TriggerRuntime::config_schema(kind),
            })
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileRequest {
    user_id: String,
    #[serde(default)]
    nodes: Vec<TriggerNode>,
}

async fn reconcile(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<ReconcileReport>, ApiError> {
    let workflow: WorkflowId = path_id(&workflow_id, "workflowId")?;
    let user: UserId = path_id(&request.user_id, "userId")?;
    let report = state
        .supervisor
        .reconcile(user, workflow, request.nodes)
        .await;
    Ok(Json(report))
}

async fn deactivate(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<ReconcileReport>, ApiError> {
    let workflow: WorkflowId = path_id(&workflow_id, "workflowId")?;
    Ok(Json(state.supervisor.deactivate(workflow).await))
}

async fn stop_listener(
    State(state): State<AppState>,
    Json(request): Json<RawStopRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let stopped = state
        .supervisor
        .runtime()
        .stop(request, state.supervisor.registry())
        .await?;
    Ok(Json(json!({ "stopped": stopped })))
}

async fn sheet_callback(
    State(state): State<AppState>,
    Path((workflow_id, trigger_node_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let workflow: WorkflowId = path_id(&workflow_id, "workflowId")?;
    let node: TriggerNodeId = path_id(&trigger_node_id, "triggerNodeId")?;
    dispatch(&state, InboundKey::Node(workflow, node), body_value(&body)).await
}

async fn telegram_update(
    State(state): State<AppState>,
    Path(access_token): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    dispatch(&state, InboundKey::BotToken(access_token), body_value(&body)).await
}

async fn workflow_webhook(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let workflow: WorkflowId = path_id(&workflow_id, "workflowId")?;
    dispatch(
        &state,
        InboundKey::Workflow(workflow, TriggerKind::Webhook),
        body_value(&body),
    )
    .await
}

async fn chat_message(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let workflow: WorkflowId = path_id(&workflow_id, "workflowId")?;
    dispatch(
        &state,
        InboundKey::Workflow(workflow, TriggerKind::ChatWindow),
        body_value(&body),
    )
    .await
}
