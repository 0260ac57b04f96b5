use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use rapport_domain::discovery::{CandidateDetail, SuggestionPage, SuggestionQuery};
use serde::Deserialize;

use super::{actor_id, map_domain_error};
use crate::middleware::AuthContext;
use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub(super) struct SuggestionParams {
    limit: Option<usize>,
    offset: Option<usize>,
    min_score: Option<f64>,
}

pub(super) async fn suggestions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<SuggestionParams>,
) -> Result<Json<SuggestionPage>, ApiError> {
    let actor = actor_id(&auth)?;
    if params.min_score.is_some_and(|score| !score.is_finite()) {
        return Err(ApiError::Validation("min_score must be a number".into()));
    }
    let page = state
        .discovery
        .suggest(
            &actor,
            SuggestionQuery::new(params.limit, params.offset, params.min_score),
        )
        .await
        .map_err(map_domain_error)?;
    Ok(Json(page))
}

pub(super) async fn candidate_detail(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<String>,
) -> Result<Json<CandidateDetail>, ApiError> {
    let actor = actor_id(&auth)?;
    let detail = state
        .discovery
        .candidate_detail(&actor, &user_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(detail))
}
