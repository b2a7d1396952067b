use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::model::{
    CreateRecipeRequest, Recipe, RecipeCore, RecipeFilter, RecipeInfo, UpdateRecipeRequest,
    render_shopping_list_csv, validate_recipe_fields,
};
use crate::AppState;
use crate::utils::{
    Claims, OptionalClaims, Paginated, Pagination, decode_base64_image, error_codes,
    error_to_api_response, remove_media_file, save_media_file, success_to_api_response,
};

#[derive(Debug, Deserialize)]
pub struct RecipeListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub author: Option<String>,
    pub is_favorited: Option<String>,
    pub is_in_shopping_cart: Option<String>,
}

fn flag_enabled(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("1") | Some("true"))
}

async fn list_page(
    state: &AppState,
    filter: &RecipeFilter,
    limit: i64,
    offset: i64,
    viewer: Option<&str>,
) -> Result<Paginated<RecipeInfo>, sqlx::Error> {
    let count = Recipe::count(&state.pool, filter).await?;
    let recipes = Recipe::list(&state.pool, filter, limit, offset).await?;

    let mut results = Vec::with_capacity(recipes.len());
    for recipe in recipes {
        let ingredients = Recipe::ingredient_items(&state.pool, &recipe.recipe_id).await?;
        let core = RecipeCore {
            recipe,
            ingredients,
        };
        results.push(core.into_info(&state.pool, viewer).await?);
    }

    Ok(Paginated { count, results })
}

#[axum::debug_handler]
pub async fn list_recipes(
    State(state): State<AppState>,
    Extension(OptionalClaims(claims)): Extension<OptionalClaims>,
    Query(query): Query<RecipeListQuery>,
) -> impl IntoResponse {
    let viewer = claims.as_ref().map(|c| c.sub.as_str());

    // 收藏/购物车过滤只对登录用户生效，匿名时忽略
    let filter = RecipeFilter {
        author: query.author.clone(),
        favorited_by: viewer
            .filter(|_| flag_enabled(&query.is_favorited))
            .map(str::to_string),
        in_cart_of: viewer
            .filter(|_| flag_enabled(&query.is_in_shopping_cart))
            .map(str::to_string),
    };

    let pagination = Pagination {
        page: query.page,
        limit: query.limit,
    };
    let limit = pagination.limit(state.config.page_size);
    let offset = pagination.offset(state.config.page_size);

    match list_page(&state, &filter, limit, offset, viewer).await {
        Ok(page) => (StatusCode::OK, success_to_api_response(page)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn create_recipe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRecipeRequest>,
) -> impl IntoResponse {
    if let Err(msg) = validate_recipe_fields(&req.name, req.cooking_time, &req.ingredients) {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::VALIDATION_ERROR, msg),
        );
    }

    let image = match decode_base64_image(&req.image) {
        Ok(image) => image,
        Err(msg) => {
            return (
                StatusCode::BAD_REQUEST,
                error_to_api_response(error_codes::VALIDATION_ERROR, msg),
            );
        }
    };
    let image_path =
        match save_media_file(&state.config.media_root, "recipes/images", &image).await {
            Ok(path) => path,
            Err(e) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_to_api_response(
                        error_codes::INTERNAL_ERROR,
                        format!("保存图片失败: {}", e),
                    ),
                );
            }
        };

    let recipe = match Recipe::create(
        &state.pool,
        &claims.sub,
        &req.name,
        &image_path,
        &req.text,
        req.cooking_time,
        &req.ingredients,
    )
    .await
    {
        Ok(recipe) => recipe,
        Err(e) => {
            // 入库失败时不留下孤儿图片文件
            remove_media_file(&state.config.media_root, &image_path).await;
            return if e.to_string().contains("Ingredient not found") {
                (
                    StatusCode::BAD_REQUEST,
                    error_to_api_response(
                        error_codes::VALIDATION_ERROR,
                        "指定的食材不存在".to_string(),
                    ),
                )
            } else {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
                )
            };
        }
    };

    match assemble_info(&state, recipe, Some(&claims.sub)).await {
        Ok(info) => (StatusCode::CREATED, success_to_api_response(info)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

async fn assemble_info(
    state: &AppState,
    recipe: Recipe,
    viewer: Option<&str>,
) -> Result<RecipeInfo, sqlx::Error> {
    let ingredients = Recipe::ingredient_items(&state.pool, &recipe.recipe_id).await?;
    let core = RecipeCore {
        recipe,
        ingredients,
    };
    core.into_info(&state.pool, viewer).await
}

#[axum::debug_handler]
pub async fn get_recipe(
    State(state): State<AppState>,
    Extension(OptionalClaims(claims)): Extension<OptionalClaims>,
    Path(recipe_id): Path<String>,
) -> impl IntoResponse {
    let viewer = claims.as_ref().map(|c| c.sub.as_str());

    match Recipe::find_core(&state.pool, &state.redis, &recipe_id).await {
        Ok(Some(core)) => match core.into_info(&state.pool, viewer).await {
            Ok(info) => (StatusCode::OK, success_to_api_response(info)),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            ),
        },
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_to_api_response(error_codes::NOT_FOUND, "菜谱不存在".to_string()),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn update_recipe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(recipe_id): Path<String>,
    Json(req): Json<UpdateRecipeRequest>,
) -> impl IntoResponse {
    let existing = match Recipe::find_row(&state.pool, &recipe_id).await {
        Ok(Some(recipe)) => recipe,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_to_api_response(error_codes::NOT_FOUND, "菜谱不存在".to_string()),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            );
        }
    };

    // 只有作者本人可以修改
    if existing.author_id.as_deref() != Some(claims.sub.as_str()) {
        return (
            StatusCode::FORBIDDEN,
            error_to_api_response(
                error_codes::PERMISSION_DENIED,
                "只有作者才能修改菜谱".to_string(),
            ),
        );
    }

    let Some(ingredients) = req.ingredients else {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "更新时必须提供食材列表".to_string(),
            ),
        );
    };

    let name = req.name.unwrap_or(existing.name);
    let text = req.text.unwrap_or(existing.text);
    let cooking_time = req.cooking_time.unwrap_or(existing.cooking_time);
    if let Err(msg) = validate_recipe_fields(&name, cooking_time, &ingredients) {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::VALIDATION_ERROR, msg),
        );
    }

    let new_image_path = match req.image {
        Some(data) => {
            let image = match decode_base64_image(&data) {
                Ok(image) => image,
                Err(msg) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        error_to_api_response(error_codes::VALIDATION_ERROR, msg),
                    );
                }
            };
            match save_media_file(&state.config.media_root, "recipes/images", &image).await {
                Ok(path) => Some(path),
                Err(e) => {
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        error_to_api_response(
                            error_codes::INTERNAL_ERROR,
                            format!("保存图片失败: {}", e),
                        ),
                    );
                }
            }
        }
        None => None,
    };
    let old_image = existing.image;

    let updated = match Recipe::update(
        &state.pool,
        &state.redis,
        &recipe_id,
        &name,
        new_image_path.as_deref(),
        &text,
        cooking_time,
        &ingredients,
    )
    .await
    {
        Ok(recipe) => recipe,
        Err(e) => {
            if let Some(path) = new_image_path.as_deref() {
                remove_media_file(&state.config.media_root, path).await;
            }
            return if e.to_string().contains("Ingredient not found") {
                (
                    StatusCode::BAD_REQUEST,
                    error_to_api_response(
                        error_codes::VALIDATION_ERROR,
                        "指定的食材不存在".to_string(),
                    ),
                )
            } else {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
                )
            };
        }
    };

    if new_image_path.is_some() {
        remove_media_file(&state.config.media_root, &old_image).await;
    }

    match assemble_info(&state, updated, Some(&claims.sub)).await {
        Ok(info) => (StatusCode::OK, success_to_api_response(info)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn delete_recipe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(recipe_id): Path<String>,
) -> impl IntoResponse {
    let existing = match Recipe::find_row(&state.pool, &recipe_id).await {
        Ok(Some(recipe)) => recipe,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_to_api_response(error_codes::NOT_FOUND, "菜谱不存在".to_string()),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            );
        }
    };

    if existing.author_id.as_deref() != Some(claims.sub.as_str()) {
        return (
            StatusCode::FORBIDDEN,
            error_to_api_response(
                error_codes::PERMISSION_DENIED,
                "只有作者才能删除菜谱".to_string(),
            ),
        );
    }

    match Recipe::delete(&state.pool, &state.redis, &recipe_id).await {
        Ok(image) => {
            if let Some(image) = image {
                remove_media_file(&state.config.media_root, &image).await;
            }
            (
                StatusCode::OK,
                success_to_api_response(serde_json::json!({
                    "deleted": true
                })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

// 收藏与购物车都是存在性开关：加入用 get-or-create，移除无条件删除。
// 两边共用的前置检查：菜谱必须存在
async fn ensure_recipe_exists(
    state: &AppState,
    recipe_id: &str,
) -> Result<(), (StatusCode, i32, String)> {
    match Recipe::find_row(&state.pool, recipe_id).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            error_codes::NOT_FOUND,
            "菜谱不存在".to_string(),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL_ERROR,
            e.to_string(),
        )),
    }
}

#[axum::debug_handler]
pub async fn favorite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(recipe_id): Path<String>,
) -> impl IntoResponse {
    if let Err((status, code, msg)) = ensure_recipe_exists(&state, &recipe_id).await {
        return (status, error_to_api_response(code, msg));
    }

    match Recipe::add_favorite(&state.pool, &claims.sub, &recipe_id).await {
        Ok(()) => (
            StatusCode::CREATED,
            success_to_api_response(serde_json::json!({
                "favorited": true
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn unfavorite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(recipe_id): Path<String>,
) -> impl IntoResponse {
    if let Err((status, code, msg)) = ensure_recipe_exists(&state, &recipe_id).await {
        return (status, error_to_api_response(code, msg));
    }

    match Recipe::remove_favorite(&state.pool, &claims.sub, &recipe_id).await {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({
                "favorited": false
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn add_to_shopping_cart(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(recipe_id): Path<String>,
) -> impl IntoResponse {
    if let Err((status, code, msg)) = ensure_recipe_exists(&state, &recipe_id).await {
        return (status, error_to_api_response(code, msg));
    }

    match Recipe::add_to_cart(&state.pool, &claims.sub, &recipe_id).await {
        Ok(()) => (
            StatusCode::CREATED,
            success_to_api_response(serde_json::json!({
                "in_shopping_cart": true
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn remove_from_shopping_cart(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(recipe_id): Path<String>,
) -> impl IntoResponse {
    if let Err((status, code, msg)) = ensure_recipe_exists(&state, &recipe_id).await {
        return (status, error_to_api_response(code, msg));
    }

    match Recipe::remove_from_cart(&state.pool, &claims.sub, &recipe_id).await {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({
                "in_shopping_cart": false
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn download_shopping_cart(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Response {
    match Recipe::shopping_list(&state.pool, &claims.sub).await {
        Ok(items) => {
            let csv = render_shopping_list_csv(&items);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                    (
                        header::CONTENT_DISPOSITION,
                        "attachment; filename=\"shopping_list.csv\"",
                    ),
                ],
                csv,
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response::<()>(error_codes::INTERNAL_ERROR, e.to_string()),
        )
            .into_response(),
    }
}
