use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::model::Ingredient;
use crate::AppState;
use crate::utils::{error_codes, error_to_api_response, success_to_api_response};

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: Option<String>,
}

#[axum::debug_handler]
pub async fn list_ingredients(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> impl IntoResponse {
    match Ingredient::search(&state.pool, query.name.as_deref()).await {
        Ok(ingredients) => (StatusCode::OK, success_to_api_response(ingredients)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn get_ingredient(
    State(state): State<AppState>,
    Path(ingredient_id): Path<String>,
) -> impl IntoResponse {
    match Ingredient::find_by_id(&state.pool, &ingredient_id).await {
        Ok(Some(ingredient)) => (StatusCode::OK, success_to_api_response(ingredient)),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_to_api_response(error_codes::NOT_FOUND, "食材不存在".to_string()),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}
