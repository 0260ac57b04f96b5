mod chat;
mod connections;
mod discovery;
mod exchange;
mod realtime;

use axum::extract::State;
use axum::{
    Json, Router,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use rapport_domain::error::DomainError;
use serde::Serialize;

use crate::middleware::AuthContext;
use crate::{error::ApiError, middleware as app_middleware, observability, state::AppState};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/v1/connections",
            post(connections::request_connection).get(connections::list_connections),
        )
        .route(
            "/v1/connections/:connection_id/accept",
            patch(connections::accept_connection),
        )
        .route(
            "/v1/connections/:connection_id/decline",
            patch(connections::decline_connection),
        )
        .route(
            "/v1/chat/:connection_id/messages",
            get(chat::chat_history).post(chat::send_chat_message),
        )
        .route(
            "/v1/chat/:connection_id/messages/:message_id",
            delete(chat::delete_chat_message),
        )
        .route("/v1/chat/:connection_id/status", get(chat::chat_status))
        .route("/v1/exchange", post(exchange::initiate_exchange))
        .route(
            "/v1/exchange/connection/:connection_id",
            get(exchange::exchange_status),
        )
        .route(
            "/v1/exchange/:exchange_id/approve",
            patch(exchange::approve_exchange),
        )
        .route(
            "/v1/exchange/:exchange_id/decline",
            patch(exchange::decline_exchange),
        )
        .route(
            "/v1/exchange/:exchange_id/reveal",
            get(exchange::reveal_exchange),
        )
        .route("/v1/discovery/suggestions", get(discovery::suggestions))
        .route(
            "/v1/discovery/suggestions/:user_id",
            get(discovery::candidate_detail),
        )
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(realtime::websocket))
        .merge(protected)
        .route_layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ));

    if !state.config.app_env.eq_ignore_ascii_case("test") {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    realtime_transport: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
        realtime_transport: state.hub.transport(),
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

fn actor_id(auth: &AuthContext) -> Result<String, ApiError> {
    auth.user_id
        .as_ref()
        .filter(|user_id| !user_id.trim().is_empty())
        .cloned()
        .ok_or(ApiError::Unauthorized)
}

fn map_domain_error(err: DomainError) -> ApiError {
    match err {
        DomainError::Validation(message) => ApiError::Validation(message),
        DomainError::NotFound => ApiError::NotFound,
        DomainError::Forbidden(message) => ApiError::Forbidden(message),
        DomainError::Conflict(message) => ApiError::Conflict(message),
        DomainError::RateLimited(message) => ApiError::TooManyRequests(message),
        DomainError::Expired(message) => ApiError::Gone(message),
        DomainError::Unavailable(message) => {
            tracing::error!(error = %message, "backing store unavailable");
            ApiError::Internal
        }
    }
}
