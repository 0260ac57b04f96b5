use axum::extract::{Extension, Path, Query, State};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rapport_domain::chat::{ChatHistory, ChatMessage, ChatStatus, HistoryQuery};
use serde::Deserialize;
use validator::Validate;

use super::{actor_id, map_domain_error};
use crate::middleware::AuthContext;
use crate::{error::ApiError, state::AppState, validation};

#[derive(Debug, Deserialize)]
pub(super) struct HistoryParams {
    limit: Option<usize>,
    before_ms: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub(super) struct SendMessageRequest {
    #[validate(length(min = 1, max = 2000))]
    content: String,
}

pub(super) async fn chat_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(connection_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<ChatHistory>, ApiError> {
    let actor = actor_id(&auth)?;
    let history = state
        .chat
        .history(
            &actor,
            &connection_id,
            HistoryQuery::new(params.limit, params.before_ms),
        )
        .await
        .map_err(map_domain_error)?;
    Ok(Json(history))
}

/// HTTP fallback for clients without a live socket.
pub(super) async fn send_chat_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(connection_id): Path<String>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_id(&auth)?;
    let receipt = state
        .chat
        .send(&actor, &connection_id, &payload.content)
        .await
        .map_err(map_domain_error)?;
    Ok((StatusCode::CREATED, Json(receipt)).into_response())
}

pub(super) async fn delete_chat_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((connection_id, message_id)): Path<(String, String)>,
) -> Result<Json<ChatMessage>, ApiError> {
    let actor = actor_id(&auth)?;
    let message = state
        .chat
        .delete_message(&actor, &connection_id, &message_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(message))
}

pub(super) async fn chat_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(connection_id): Path<String>,
) -> Result<Json<ChatStatus>, ApiError> {
    let actor = actor_id(&auth)?;
    let status = state
        .chat
        .status(&actor, &connection_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(status))
}
