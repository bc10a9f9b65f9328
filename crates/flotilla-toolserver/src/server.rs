//! Transport layer: per-session SSE stream + inbound JSON-RPC endpoint.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path as AxumPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use flotilla_core::protocol::codes;
use flotilla_core::{AccessLevel, EventMessage, RpcRequest, RpcResponse};
use futures::Stream;
use tracing::{info, warn};

use crate::registry::{ToolContext, ToolRegistry};
use crate::session::SessionRegistry;

/// Maximum inbound request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub const AGENT_ID_HEADER: &str = "x-agent-id";
pub const ACCESS_LEVEL_HEADER: &str = "x-access-level";
pub const PROJECT_PATH_HEADER: &str = "x-project-path";

pub struct ToolServerState {
    pub sessions: Arc<SessionRegistry>,
    pub registry: Arc<ToolRegistry>,
}

/// Routes for mounting into the coordinator's HTTP server.
pub fn router(state: Arc<ToolServerState>) -> Router {
    Router::new()
        .route("/toolcall/stream", get(stream_handler))
        .route("/toolcall/rpc/:session", post(rpc_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|s| !s.is_empty())
}

/// Removes the session when the stream is dropped, however that happens.
struct StreamGuard {
    sessions: Arc<SessionRegistry>,
    session_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.sessions.remove(&self.session_id).is_some() {
            info!("stream closed, session {} gone", self.session_id);
        }
    }
}

async fn stream_handler(
    State(state): State<Arc<ToolServerState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let agent_id = header_str(&headers, AGENT_ID_HEADER)
        .map(String::from)
        .or_else(|| query.get("agent_id").filter(|s| !s.is_empty()).cloned())
        .ok_or((
            StatusCode::BAD_REQUEST,
            "missing agent-id header or agent_id query parameter".to_string(),
        ))?;

    let access = header_str(&headers, ACCESS_LEVEL_HEADER)
        .map(|v| {
            AccessLevel::parse(v).ok_or((
                StatusCode::BAD_REQUEST,
                format!("unknown access level: {v}"),
            ))
        })
        .transpose()?
        .unwrap_or_default();

    let project_path = header_str(&headers, PROJECT_PATH_HEADER).map(String::from);

    let session = state.sessions.create(&agent_id, access, project_path);
    let endpoint_url = format!("/toolcall/rpc/{}", session.id);
    let sessions = state.sessions.clone();

    let stream = async_stream::stream! {
        let _guard = StreamGuard {
            sessions,
            session_id: session.id.clone(),
        };
        match sse_event(&EventMessage::endpoint(&endpoint_url)) {
            Ok(evt) => yield Ok(evt),
            Err(e) => {
                warn!("endpoint event unserializable: {e}");
                return;
            }
        }
        while let Some(event) = session.next_event().await {
            match sse_event(&event) {
                Ok(evt) => yield Ok(evt),
                Err(e) => warn!("event unserializable, skipping: {e}"),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(message: &EventMessage) -> Result<Event, axum::Error> {
    Ok(Event::default()
        .event(message.event.clone())
        .json_data(&message.data)?)
}

async fn rpc_handler(
    State(state): State<Arc<ToolServerState>>,
    AxumPath(session_id): AxumPath<String>,
    Json(request): Json<RpcRequest>,
) -> impl IntoResponse {
    let session = match state.sessions.get(&session_id) {
        Some(s) if s.is_connected() => s,
        _ => {
            let resp = RpcResponse::err(
                &request.id,
                codes::SESSION_GONE,
                format!("session gone: {session_id}"),
            );
            return (StatusCode::NOT_FOUND, Json(resp));
        }
    };

    let ctx = ToolContext { session };
    let resp = state
        .registry
        .dispatch(&request.id, &request.method, request.params, &ctx)
        .await;
    (StatusCode::OK, Json(resp))
}
