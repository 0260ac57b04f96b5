use axum::extract::{Extension, Path, State};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rapport_domain::connections::ConnectionStatus;
use rapport_domain::exchange::{ContactExchange, ExchangeRequest, ExchangeReveal, ExchangeSummary};
use serde::Deserialize;
use validator::Validate;

use super::{actor_id, map_domain_error};
use crate::middleware::AuthContext;
use crate::{error::ApiError, observability, state::AppState, validation};

#[derive(Debug, Deserialize, Validate)]
pub(super) struct InitiateExchangeRequest {
    #[validate(length(min = 1, max = 128))]
    connection_id: String,
    #[serde(default)]
    share_email: bool,
    #[serde(default)]
    share_phone: bool,
    #[serde(default)]
    wants_email: bool,
    #[serde(default)]
    wants_phone: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApproveExchangeRequest {
    #[serde(default)]
    share_email: bool,
    #[serde(default)]
    share_phone: bool,
}

pub(super) async fn initiate_exchange(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<InitiateExchangeRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_id(&auth)?;
    let exchange = state
        .exchange
        .initiate(
            &actor,
            ExchangeRequest {
                connection_id: payload.connection_id,
                share_email: payload.share_email,
                share_phone: payload.share_phone,
                wants_email: payload.wants_email,
                wants_phone: payload.wants_phone,
            },
        )
        .await
        .map_err(map_domain_error)?;
    observability::register_ledger_transition("exchange", "PENDING");
    Ok((StatusCode::CREATED, Json(exchange)).into_response())
}

pub(super) async fn approve_exchange(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(exchange_id): Path<String>,
    Json(payload): Json<ApproveExchangeRequest>,
) -> Result<Json<ContactExchange>, ApiError> {
    let actor = actor_id(&auth)?;
    let exchange = state
        .exchange
        .approve(
            &actor,
            &exchange_id,
            payload.share_email,
            payload.share_phone,
        )
        .await
        .map_err(map_domain_error)?;
    observability::register_ledger_transition("exchange", "APPROVED");
    observability::register_ledger_transition(
        "connection",
        ConnectionStatus::Graduated.as_str(),
    );
    Ok(Json(exchange))
}

pub(super) async fn decline_exchange(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(exchange_id): Path<String>,
) -> Result<Json<ContactExchange>, ApiError> {
    let actor = actor_id(&auth)?;
    let exchange = state
        .exchange
        .decline(&actor, &exchange_id)
        .await
        .map_err(map_domain_error)?;
    observability::register_ledger_transition("exchange", "DECLINED");
    Ok(Json(exchange))
}

pub(super) async fn reveal_exchange(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(exchange_id): Path<String>,
) -> Result<Json<ExchangeReveal>, ApiError> {
    let actor = actor_id(&auth)?;
    let reveal = state
        .exchange
        .reveal(&actor, &exchange_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(reveal))
}

pub(super) async fn exchange_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(connection_id): Path<String>,
) -> Result<Json<ExchangeSummary>, ApiError> {
    let actor = actor_id(&auth)?;
    let summary = state
        .exchange
        .status_for_connection(&actor, &connection_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(summary))
}
