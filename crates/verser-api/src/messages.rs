use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;

use verser_db::models::NewMessage;
use verser_db::with_storage;
use verser_types::api::{Claims, SendMessageRequest};
use verser_types::events::RelayEvent;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Id of the oldest message from the previous page; fetches older ones.
    pub before: Option<i64>,
}

fn default_limit() -> u32 {
    50
}

/// REST twin of the relay's `send_message` frame: persists as the caller
/// and broadcasts `new_message` to every open socket.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<SendMessageRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("message content is empty".into()));
    }

    let user_id = claims.sub;
    let (message, user) = with_storage(&state.storage, move |s| {
        let message = s.create_message(NewMessage {
            user_id,
            conversation_id,
            content: req.content,
            kind: req.kind,
        })?;
        Ok((message, s.get_user(user_id)?))
    })
    .await?;

    state
        .relay
        .broadcast_all(&RelayEvent::NewMessage {
            message: message.clone(),
            user: user.map(Into::into),
        })
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.clamp(1, 200);
    let before = query.before;
    let messages = with_storage(&state.storage, move |s| {
        s.list_messages(conversation_id, limit, before)
    })
    .await?;
    Ok(Json(messages))
}
