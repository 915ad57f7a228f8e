//! HTTP and WebSocket surface
//!
//! Thin caller-facing layer: start/status/abort plus the per-caller
//! event stream. Authentication is solved upstream; the caller
//! identity arrives pre-verified in the `x-caller-id` header.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::admission::AbortOutcome;
use crate::orchestrator::{start_session, SessionDeps, StartError, StartRequest};

const CALLER_HEADER: &str = "x-caller-id";

pub fn router(deps: Arc<SessionDeps>) -> Router {
    Router::new()
        .route("/api/work/start", post(start_handler))
        .route("/api/work/status", get(status_handler))
        .route("/api/work/abort", post(abort_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(deps)
}

fn caller_id(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"detail": "missing x-caller-id header"})),
            )
                .into_response()
        })
}

async fn start_handler(
    State(deps): State<Arc<SessionDeps>>,
    headers: HeaderMap,
    Json(req): Json<StartRequest>,
) -> Response {
    let caller = match caller_id(&headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    match start_session(&deps, &caller, req) {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({"status": "started"}))).into_response(),
        Err(e @ StartError::Conflict(_)) => {
            (StatusCode::CONFLICT, Json(json!({"detail": e.to_string()}))).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": e.to_string()})),
        )
            .into_response(),
    }
}

async fn status_handler(State(deps): State<Arc<SessionDeps>>, headers: HeaderMap) -> Response {
    let caller = match caller_id(&headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    let status = deps.admission.status();
    let mine = status.owner_id.as_deref() == Some(caller.as_str());
    Json(json!({
        "active": status.active,
        "mine": mine,
        "phase": status.phase,
    }))
    .into_response()
}

async fn abort_handler(State(deps): State<Arc<SessionDeps>>, headers: HeaderMap) -> Response {
    let caller = match caller_id(&headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    // Owner check and cancellation are one atomic step; a snapshot
    // check here could abort a successor session that acquired the
    // slot in between.
    match deps.admission.abort_if_owner(&caller) {
        AbortOutcome::Idle => (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "no work session is active"})),
        )
            .into_response(),
        AbortOutcome::NotOwner => (
            StatusCode::FORBIDDEN,
            Json(json!({"detail": "cannot abort another caller's session"})),
        )
            .into_response(),
        AbortOutcome::Aborted => Json(json!({"status": "aborted"})).into_response(),
    }
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

/// WebSocket upgrade: one event stream per caller
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(deps): State<Arc<SessionDeps>>,
    headers: HeaderMap,
) -> Response {
    let caller = match caller_id(&headers) {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, deps, caller))
}

async fn handle_socket(socket: WebSocket, deps: Arc<SessionDeps>, caller: String) {
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        caller_id = %caller,
    );

    let mut rx = deps.delivery.subscribe(&caller);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut replaced = false;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    // Replaced by a newer subscription for this caller.
                    replaced = true;
                    break;
                };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(
                            component = "websocket",
                            event = "ws.serialize_failed",
                            error = %e,
                        );
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(other)) => {
                        // Observers only listen; anything inbound
                        // besides close/ping is ignored.
                        debug!(
                            component = "websocket",
                            event = "ws.inbound_ignored",
                            kind = ?std::mem::discriminant(&other),
                        );
                    }
                }
            }
        }
    }

    if !replaced {
        deps.delivery.unsubscribe(&caller);
    }
    info!(
        component = "websocket",
        event = "ws.connection.closed",
        caller_id = %caller,
    );
}
