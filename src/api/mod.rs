//! Dashboard HTTP surface.
//!
//! JSON in, JSON out; error kinds map to status codes with an
//! `{"error": msg}` body. The realtime channel lives in `ws.rs`.

pub mod ws;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path as AxumPath, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use flotilla_captain::{CaptainHandle, EscalationAction, TaskSpec};
use flotilla_core::{DispatchStatus, Error, Thresholds};
use flotilla_spawn::Spawner;
use flotilla_state::StateStore;
use flotilla_toolserver::SessionRegistry;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::supervisor::CaptainSupervisor;

pub struct ApiState {
    pub store: Arc<StateStore>,
    pub captain: CaptainHandle,
    pub spawner: Arc<Spawner>,
    pub supervisor: Option<Arc<CaptainSupervisor>>,
    pub sessions: Arc<SessionRegistry>,
    pub updates: broadcast::Sender<Value>,
    pub started_at: Instant,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/state", get(state_handler))
        .route("/api/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/agents/spawn", post(spawn_agent_handler))
        .route("/api/agents/:id/stop", post(stop_agent_handler))
        .route("/api/agents/:id/graceful-stop", post(graceful_stop_handler))
        .route("/api/captain/status", get(captain_status_handler))
        .route("/api/captain/subagents", get(subagents_handler))
        .route("/api/captain/escalations", get(escalations_handler))
        .route(
            "/api/captain/escalation/:id/respond",
            post(escalation_respond_handler),
        )
        .route("/api/captain/task", post(captain_task_handler))
        .route("/api/captain/recon", post(captain_recon_handler))
        .route("/api/tasks", get(list_tasks_handler).post(create_task_handler))
        .route(
            "/api/tasks/:id",
            get(get_task_handler).patch(patch_task_handler).delete(delete_task_handler),
        )
        .route("/api/dispatches", get(list_dispatches_handler))
        .route("/api/dispatches/:id", get(get_dispatch_handler))
        .route("/api/dispatches/:id/abort", post(abort_dispatch_handler))
        .route("/api/alerts/:id/ack", post(ack_alert_handler))
        .route("/api/alerts/clear", post(clear_alerts_handler))
        .route("/api/thresholds", put(thresholds_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// Map an error kind to its HTTP shape.
fn error_response(e: Error) -> (StatusCode, Json<Value>) {
    let status = match &e {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) | Error::PaneNotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::PaneUnavailable(_) | Error::SessionGone(_) | Error::SpawnFailed(_) => {
            StatusCode::BAD_GATEWAY
        }
        Error::CrashLoop(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn ok(value: Value) -> ApiResult {
    Ok(Json(value))
}

// ---------------------------------------------------------------------------
// State, health, stats
// ---------------------------------------------------------------------------

async fn state_handler(State(state): State<Arc<ApiState>>) -> ApiResult {
    let snapshot = state.store.snapshot().await;
    let captain = state.captain.status().await;
    let supervisor = match &state.supervisor {
        Some(s) => Some(s.state().await),
        None => None,
    };
    ok(json!({
        "state": snapshot,
        "captain": captain,
        "supervisor": supervisor,
    }))
}

async fn health_handler(State(state): State<Arc<ApiState>>) -> ApiResult {
    let snapshot = state.store.snapshot().await;
    ok(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "agents": snapshot.agents.len(),
        "sessions": state.sessions.len(),
        "alerts": snapshot.alerts.iter().filter(|a| !a.acknowledged).count(),
    }))
}

async fn stats_handler(State(state): State<Arc<ApiState>>) -> ApiResult {
    let snapshot = state.store.snapshot().await;
    let total_tokens: u64 = snapshot.metrics.values().map(|m| m.tokens_used).sum();
    let total_cost: f64 = snapshot.metrics.values().map(|m| m.estimated_cost).sum();
    let total_reports: u32 = snapshot.metrics.values().map(|m| m.reports_submitted).sum();
    let mut by_status = std::collections::HashMap::new();
    for agent in snapshot.agents.values() {
        *by_status.entry(agent.status.to_string()).or_insert(0u32) += 1;
    }
    ok(json!({
        "agents_by_status": by_status,
        "total_tokens": total_tokens,
        "total_cost": total_cost,
        "total_reports": total_reports,
        "activity_entries": snapshot.activity_log.len(),
        "snapshot_writes": state.store.write_count(),
    }))
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SpawnBody {
    config_name: String,
    #[serde(default)]
    project_path: Option<String>,
    task: String,
}

async fn spawn_agent_handler(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<SpawnBody>,
) -> ApiResult {
    let prompt = format!(
        "You are agent {{agent_id}}. Call register_agent first. Task: {}.",
        body.task
    );
    let handle = state
        .spawner
        .spawn_agent(&body.config_name, &prompt, body.project_path.as_deref())
        .await
        .map_err(error_response)?;
    ok(json!({ "agent_id": handle.agent_id, "pane": handle.pane }))
}

async fn stop_agent_handler(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult {
    state.spawner.force_stop(&id).await.map_err(error_response)?;
    ok(json!({ "ok": true }))
}

#[derive(Deserialize, Default)]
struct GracefulStopBody {
    #[serde(default)]
    reason: Option<String>,
}

async fn graceful_stop_handler(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
    body: Option<Json<GracefulStopBody>>,
) -> ApiResult {
    let reason = body
        .and_then(|b| b.0.reason)
        .unwrap_or_else(|| "operator requested shutdown".to_string());
    state
        .spawner
        .stop_agent(&id, &reason)
        .await
        .map_err(error_response)?;
    ok(json!({ "ok": true, "deadline_secs": 60 }))
}

// ---------------------------------------------------------------------------
// Captain
// ---------------------------------------------------------------------------

async fn captain_status_handler(State(state): State<Arc<ApiState>>) -> ApiResult {
    let status = state.captain.status().await;
    let supervisor = match &state.supervisor {
        Some(s) => Some(s.state().await),
        None => None,
    };
    ok(json!({ "loop": status, "supervisor": supervisor }))
}

async fn subagents_handler(State(state): State<Arc<ApiState>>) -> ApiResult {
    let recons = state.captain.active_recons().await;
    ok(serde_json::to_value(recons).unwrap_or_default())
}

async fn escalations_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<std::collections::HashMap<String, String>>,
) -> ApiResult {
    let include_resolved = query.get("all").map(|v| v == "true").unwrap_or(false);
    let escalations = state.captain.escalations(include_resolved).await;
    ok(serde_json::to_value(escalations).unwrap_or_default())
}

#[derive(Deserialize)]
struct EscalationRespondBody {
    action: EscalationAction,
    #[serde(default)]
    response: Option<String>,
}

async fn escalation_respond_handler(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<EscalationRespondBody>,
) -> ApiResult {
    let escalation = state
        .captain
        .respond_escalation(&id, body.action, body.response.as_deref())
        .await
        .map_err(error_response)?;
    ok(serde_json::to_value(escalation).unwrap_or_default())
}

async fn captain_task_handler(
    State(state): State<Arc<ApiState>>,
    Json(spec): Json<TaskSpec>,
) -> ApiResult {
    let task_id = state.captain.submit_task(spec).await;
    ok(json!({ "task_id": task_id, "status": "submitted" }))
}

#[derive(Deserialize)]
struct ReconBody {
    project_path: String,
    #[serde(default)]
    mission: Option<String>,
}

async fn captain_recon_handler(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<ReconBody>,
) -> ApiResult {
    let recon_id = state
        .captain
        .start_recon(&body.project_path, body.mission.as_deref())
        .await;
    ok(json!({ "recon_id": recon_id, "status": "started" }))
}

// ---------------------------------------------------------------------------
// Task queue CRUD
// ---------------------------------------------------------------------------

async fn list_tasks_handler(State(state): State<Arc<ApiState>>) -> ApiResult {
    ok(serde_json::to_value(state.captain.tasks().await).unwrap_or_default())
}

async fn create_task_handler(
    State(state): State<Arc<ApiState>>,
    Json(spec): Json<TaskSpec>,
) -> ApiResult {
    let task_id = state.captain.submit_task(spec).await;
    ok(json!({ "task_id": task_id, "status": "submitted" }))
}

async fn get_task_handler(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult {
    match state.captain.get_task(&id).await {
        Some(task) => ok(serde_json::to_value(task).unwrap_or_default()),
        None => Err(error_response(Error::not_found(format!("task: {id}")))),
    }
}

#[derive(Deserialize)]
struct PatchTaskBody {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<u32>,
}

async fn patch_task_handler(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<PatchTaskBody>,
) -> ApiResult {
    let task = state
        .captain
        .update_task(&id, |t| {
            if let Some(title) = body.title {
                t.title = title;
            }
            if let Some(description) = body.description {
                t.description = description;
            }
            if let Some(priority) = body.priority {
                t.priority = priority;
            }
        })
        .await
        .map_err(error_response)?;
    ok(serde_json::to_value(task).unwrap_or_default())
}

async fn delete_task_handler(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult {
    state.captain.delete_task(&id).await.map_err(error_response)?;
    ok(json!({ "ok": true }))
}

// ---------------------------------------------------------------------------
// Dispatches
// ---------------------------------------------------------------------------

async fn list_dispatches_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<std::collections::HashMap<String, String>>,
) -> ApiResult {
    let filter = match query.get("status").map(String::as_str) {
        Some("spawning") => Some(DispatchStatus::Spawning),
        Some("running") => Some(DispatchStatus::Running),
        Some("completed") => Some(DispatchStatus::Completed),
        Some("failed") => Some(DispatchStatus::Failed),
        Some("aborted") => Some(DispatchStatus::Aborted),
        Some("cancelled") => Some(DispatchStatus::Cancelled),
        Some(other) => {
            return Err(error_response(Error::invalid_input(format!(
                "unknown dispatch status: {other}"
            ))))
        }
        None => None,
    };
    let dispatches = state.captain.dispatcher().list_dispatches(filter).await;
    ok(serde_json::to_value(dispatches).unwrap_or_default())
}

async fn get_dispatch_handler(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult {
    match state.captain.dispatcher().get_dispatch(&id).await {
        Some(dispatch) => {
            let counts = dispatch.counts();
            let mut value = serde_json::to_value(&dispatch).unwrap_or_default();
            value["counts"] = serde_json::to_value(counts).unwrap_or_default();
            ok(value)
        }
        None => Err(error_response(Error::not_found(format!("dispatch: {id}")))),
    }
}

async fn abort_dispatch_handler(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult {
    state
        .captain
        .dispatcher()
        .abort_dispatch(&id)
        .await
        .map_err(error_response)?;
    ok(json!({ "ok": true }))
}

// ---------------------------------------------------------------------------
// Alerts, thresholds
// ---------------------------------------------------------------------------

async fn ack_alert_handler(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult {
    state.store.ack_alert(&id).await.map_err(error_response)?;
    ok(json!({ "ok": true }))
}

async fn clear_alerts_handler(State(state): State<Arc<ApiState>>) -> ApiResult {
    let removed = state.store.clear_alerts().await;
    ok(json!({ "removed": removed }))
}

async fn thresholds_handler(
    State(state): State<Arc<ApiState>>,
    Json(thresholds): Json<Thresholds>,
) -> ApiResult {
    state.store.set_thresholds(thresholds.clone()).await;
    ok(serde_json::to_value(thresholds).unwrap_or_default())
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_connection(socket, state))
}
