use axum::extract::{Extension, Path, Query, State};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rapport_domain::connections::{
    Connection, ConnectionDirection, ConnectionPage, ConnectionRequest, ConnectionStatus,
    build_list_query,
};
use serde::Deserialize;
use validator::Validate;

use super::{actor_id, map_domain_error};
use crate::middleware::AuthContext;
use crate::{error::ApiError, observability, state::AppState, validation};

#[derive(Debug, Deserialize, Validate)]
pub(super) struct CreateConnectionRequest {
    #[validate(length(min = 1, max = 128))]
    recipient_id: String,
    #[validate(length(min = 20, max = 200))]
    intro_message: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ConnectionListParams {
    status: Option<String>,
    #[serde(rename = "type")]
    direction: Option<ConnectionDirection>,
    limit: Option<usize>,
    offset: Option<usize>,
}

pub(super) async fn request_connection(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateConnectionRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_id(&auth)?;
    let connection = state
        .connections
        .request(
            &actor,
            ConnectionRequest {
                recipient_id: payload.recipient_id,
                intro_message: payload.intro_message,
            },
        )
        .await
        .map_err(map_domain_error)?;
    observability::register_ledger_transition("connection", connection.status.as_str());
    Ok((StatusCode::CREATED, Json(connection)).into_response())
}

pub(super) async fn list_connections(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<ConnectionListParams>,
) -> Result<Json<ConnectionPage>, ApiError> {
    let actor = actor_id(&auth)?;
    let status = params
        .status
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            ConnectionStatus::parse(value)
                .ok_or_else(|| ApiError::Validation(format!("unknown status: {value}")))
        })
        .transpose()?;
    let query = build_list_query(
        &actor,
        status,
        params.direction.unwrap_or_default(),
        params.limit,
        params.offset,
    );
    let page = state
        .connections
        .list(query)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(page))
}

pub(super) async fn accept_connection(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(connection_id): Path<String>,
) -> Result<Json<Connection>, ApiError> {
    let actor = actor_id(&auth)?;
    let connection = state
        .connections
        .accept(&actor, &connection_id)
        .await
        .map_err(map_domain_error)?;
    observability::register_ledger_transition("connection", connection.status.as_str());
    Ok(Json(connection))
}

pub(super) async fn decline_connection(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(connection_id): Path<String>,
) -> Result<Json<Connection>, ApiError> {
    let actor = actor_id(&auth)?;
    let connection = state
        .connections
        .decline(&actor, &connection_id)
        .await
        .map_err(map_domain_error)?;
    observability::register_ledger_transition("connection", connection.status.as_str());
    Ok(Json(connection))
}
