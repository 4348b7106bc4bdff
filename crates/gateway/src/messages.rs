//! `/api/messages` routes.

use std::sync::Arc;

use {
    axum::{
        Router,
        extract::{Path, State},
        response::Json,
        routing::{get, post},
    },
    base64::Engine,
    serde::Deserialize,
    serde_json::{Value, json},
    switchboard_protocol::{Jid, OutboundContent},
    switchboard_sessions::BatchMessage,
    tracing::debug,
};

use crate::{error::ApiError, state::GatewayState};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/send/{id}", post(send_handler))
        .route("/send-bulk/{id}", post(send_bulk_handler))
        .route("/send-group/{id}", post(send_group_handler))
        .route("/groups/{id}", get(groups_handler))
}

/// Attachment carried inline as base64.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBody {
    pub data: String,
    pub mime_type: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Option<MediaBody>,
}

#[derive(Debug, Deserialize)]
pub struct BulkBody {
    #[serde(default)]
    pub messages: Vec<SendBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupBody {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Option<MediaBody>,
}

/// Text becomes the caption when media is attached.
fn content_of(
    text: Option<&str>,
    media: Option<&MediaBody>,
) -> Result<OutboundContent, ApiError> {
    let text = text.map(str::trim).filter(|t| !t.is_empty());
    match (media, text) {
        (Some(media), caption) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(media.data.as_bytes())
                .map_err(|e| ApiError::validation(format!("media.data is not base64: {e}")))?;
            Ok(OutboundContent::media(
                media.mime_type.clone(),
                bytes,
                caption.map(str::to_string),
                media.file_name.clone(),
            ))
        },
        (None, Some(text)) => Ok(OutboundContent::text(text)),
        (None, None) => Err(ApiError::validation("send 'text' or 'media'")),
    }
}

fn recipient(to: &str) -> Result<Jid, ApiError> {
    let to = to.trim();
    if to.is_empty() {
        return Err(ApiError::validation("'to' is required"));
    }
    Ok(Jid::user(to))
}

async fn send_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Json(body): Json<SendBody>,
) -> Result<Json<Value>, ApiError> {
    let to = recipient(&body.to)?;
    let content = content_of(body.text.as_deref(), body.media.as_ref())?;
    debug!(session_id = %id, %to, content = %content.describe(), "send request");
    let receipt = state.sessions.send(&id, &to, &content).await?;
    Ok(Json(json!({ "ok": true, "receipt": receipt })))
}

async fn send_bulk_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Json(body): Json<BulkBody>,
) -> Result<Json<Value>, ApiError> {
    if body.messages.is_empty() {
        return Err(ApiError::validation("'messages' must be a non-empty array of { to, text }"));
    }
    let messages = body
        .messages
        .iter()
        .map(|m| {
            Ok(BatchMessage {
                to: recipient(&m.to)?,
                content: content_of(m.text.as_deref(), m.media.as_ref())?,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let report = state.sessions.send_batch(&id, &messages).await?;
    Ok(Json(json!({
        "ok": true,
        "sent": report.receipts.len(),
        "recreated": report.recreated,
        "receipts": report.receipts,
    })))
}

async fn send_group_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Json(body): Json<GroupBody>,
) -> Result<Json<Value>, ApiError> {
    let group = body.group_id.trim();
    if group.is_empty() {
        return Err(ApiError::validation("'groupId' is required"));
    }
    let content = content_of(body.text.as_deref(), body.media.as_ref())?;
    let to = Jid::group(group);
    debug!(session_id = %id, %to, content = %content.describe(), "group send request");
    let receipt = state.sessions.send(&id, &to, &content).await?;
    Ok(Json(json!({ "ok": true, "receipt": receipt })))
}

async fn groups_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let groups = state.sessions.groups(&id).await?;
    Ok(Json(json!({ "ok": true, "total": groups.len(), "groups": groups })))
}
