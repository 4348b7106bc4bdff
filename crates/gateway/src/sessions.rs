//! `/api/sessions` routes.

use std::sync::Arc;

use {
    axum::{
        Router,
        extract::{Path, State},
        response::Json,
        routing::{delete, get, post},
    },
    serde_json::{Value, json},
    switchboard_sessions::{SessionError, StartOutcome},
};

use crate::{error::ApiError, state::GatewayState};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/", get(list_handler))
        .route("/start/{id}", post(start_handler))
        .route("/status/{id}", get(status_handler))
        .route("/recreate/{id}", post(recreate_handler))
        .route("/{id}", delete(remove_handler))
}

async fn start_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let outcome = state.sessions.start(&id);
    let message = match outcome {
        StartOutcome::AlreadyActive => format!("session '{id}' is already active"),
        StartOutcome::Starting => format!("session '{id}' is starting; scan the QR code if asked"),
    };
    Json(json!({
        "ok": true,
        "qr": outcome == StartOutcome::Starting,
        "status": outcome,
        "message": message,
    }))
}

async fn status_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let report = state.sessions.status(&id);
    Json(json!({ "ok": true, "session": report }))
}

async fn list_handler(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let active = state.sessions.list_active();
    Json(json!({ "ok": true, "total": active.len(), "sessions": active }))
}

async fn recreate_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let handle = state.sessions.recreate(&id).await?;
    Ok(Json(json!({ "ok": true, "generation": handle.generation() })))
}

async fn remove_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.sessions.remove(&id).await {
        return Err(SessionError::SessionNotFound(id).into());
    }
    Ok(Json(json!({ "ok": true, "removed": id })))
}
