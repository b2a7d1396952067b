use std::collections::HashSet;

use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::model::{
    AvatarRequest, AvatarResponse, CreateUserRequest, LoginRequest, LoginResponse,
    SetPasswordRequest, SubscriptionInfo, User, UserInfo, valid_username,
};
use crate::AppState;
use crate::routes::recipe::model::Recipe;
use crate::utils::{
    Claims, Paginated, Pagination, decode_base64_image, error_codes, error_to_api_response,
    generate_token, media_url, remove_media_file, save_media_file, success_to_api_response,
};

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> impl IntoResponse {
    // 检查用户名格式
    if !valid_username(&req.username) {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "用户名格式无效，只允许使用字母、数字和下划线".to_string(),
            ),
        );
    }
    if !req.email.contains('@') || req.email.len() > 150 {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::VALIDATION_ERROR, "邮箱格式无效".to_string()),
        );
    }
    if req.password.len() < 6 || req.password.len() > 24 {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "密码长度必须在6到24个字符之间".to_string(),
            ),
        );
    }

    match User::create(&state.pool, req).await {
        Ok(user) => (
            StatusCode::CREATED,
            success_to_api_response(UserInfo::from_user(user, false)),
        ),
        Err(e) => {
            if e.to_string().contains("unique constraint") {
                (
                    StatusCode::BAD_REQUEST,
                    error_to_api_response(
                        error_codes::USER_EXISTS,
                        "邮箱或用户名已被占用".to_string(),
                    ),
                )
            } else {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_to_api_response(error_codes::INTERNAL_ERROR, "创建用户失败".to_string()),
                )
            }
        }
    }
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let user = match User::find_by_email(&state.pool, &req.email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
            );
        }
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            );
        }
    };

    // 验证密码
    match user.verify_login(&req.password).await {
        Ok(true) => (),
        Ok(false) => {
            return (
                StatusCode::UNAUTHORIZED,
                error_to_api_response(error_codes::AUTH_FAILED, "密码无效".to_string()),
            );
        }
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            );
        }
    }

    match generate_token(&user.user_id, &state.config) {
        Ok(token) => (
            StatusCode::OK,
            success_to_api_response(LoginResponse {
                user_id: user.user_id,
                token,
            }),
        ),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, "生成令牌失败".to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn set_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetPasswordRequest>,
) -> impl IntoResponse {
    // 验证新密码长度
    if req.new_password.len() < 6 || req.new_password.len() > 24 {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(
                error_codes::VALIDATION_ERROR,
                "密码长度必须在6到24个字符之间".to_string(),
            ),
        );
    }

    let user = match User::find_by_id(&state.pool, &claims.sub).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            );
        }
    };

    match user.verify_login(&req.current_password).await {
        Ok(true) => (),
        Ok(false) => {
            return (
                StatusCode::UNAUTHORIZED,
                error_to_api_response(error_codes::AUTH_FAILED, "当前密码不正确".to_string()),
            );
        }
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, "数据库错误".to_string()),
            );
        }
    }

    match User::set_password(&state.pool, &claims.sub, &req.new_password).await {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({
                "changed": true
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    match User::find_by_id(&state.pool, &claims.sub).await {
        Ok(Some(user)) => (
            StatusCode::OK,
            success_to_api_response(UserInfo::from_user(user, false)),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(pagination): Query<Pagination>,
) -> impl IntoResponse {
    let limit = pagination.limit(state.config.page_size);
    let offset = pagination.offset(state.config.page_size);

    let count = match User::count(&state.pool).await {
        Ok(count) => count,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            );
        }
    };
    let users = match User::list(&state.pool, limit, offset).await {
        Ok(users) => users,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            );
        }
    };

    // 一次取出全部已订阅作者，避免逐个查询
    let subscribed: HashSet<String> =
        match User::subscribed_author_ids(&state.pool, &claims.sub).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
                );
            }
        };

    let results = users
        .into_iter()
        .map(|user| {
            let is_subscribed = subscribed.contains(&user.user_id);
            UserInfo::from_user(user, is_subscribed)
        })
        .collect();

    (
        StatusCode::OK,
        success_to_api_response(Paginated { count, results }),
    )
}

#[axum::debug_handler]
pub async fn get_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let user = match User::find_by_id(&state.pool, &user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            );
        }
    };

    match User::is_subscribed(&state.pool, &claims.sub, &user_id).await {
        Ok(is_subscribed) => (
            StatusCode::OK,
            success_to_api_response(UserInfo::from_user(user, is_subscribed)),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn get_avatar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    match User::find_by_id(&state.pool, &claims.sub).await {
        Ok(Some(user)) => (
            StatusCode::OK,
            success_to_api_response(AvatarResponse {
                avatar: user.avatar.as_deref().map(media_url),
            }),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn update_avatar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AvatarRequest>,
) -> impl IntoResponse {
    let image = match decode_base64_image(&req.avatar) {
        Ok(image) => image,
        Err(msg) => {
            return (
                StatusCode::BAD_REQUEST,
                error_to_api_response(error_codes::VALIDATION_ERROR, msg),
            );
        }
    };

    let user = match User::find_by_id(&state.pool, &claims.sub).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            );
        }
    };

    let avatar_path = match save_media_file(&state.config.media_root, "avatars", &image).await {
        Ok(path) => path,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(
                    error_codes::INTERNAL_ERROR,
                    format!("保存头像失败: {}", e),
                ),
            );
        }
    };

    match User::update_avatar(&state.pool, &claims.sub, Some(&avatar_path)).await {
        Ok(()) => {
            // 换头像后清理旧文件
            if let Some(old) = user.avatar.as_deref() {
                remove_media_file(&state.config.media_root, old).await;
            }
            (
                StatusCode::OK,
                success_to_api_response(AvatarResponse {
                    avatar: Some(media_url(&avatar_path)),
                }),
            )
        }
        Err(e) => {
            remove_media_file(&state.config.media_root, &avatar_path).await;
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn delete_avatar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    let user = match User::find_by_id(&state.pool, &claims.sub).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            );
        }
    };

    match User::update_avatar(&state.pool, &claims.sub, None).await {
        Ok(()) => {
            if let Some(old) = user.avatar.as_deref() {
                remove_media_file(&state.config.media_root, old).await;
            }
            (
                StatusCode::OK,
                success_to_api_response(AvatarResponse { avatar: None }),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    // 不允许订阅自己，约束只在这一层
    if claims.sub == user_id {
        return (
            StatusCode::BAD_REQUEST,
            error_to_api_response(error_codes::VALIDATION_ERROR, "不能订阅自己".to_string()),
        );
    }

    match User::find_by_id(&state.pool, &user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            );
        }
    }

    match User::subscribe(&state.pool, &claims.sub, &user_id).await {
        Ok(()) => (
            StatusCode::CREATED,
            success_to_api_response(serde_json::json!({
                "subscribed": true
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[axum::debug_handler]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match User::find_by_id(&state.pool, &user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                error_to_api_response(error_codes::NOT_FOUND, "用户不存在".to_string()),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            );
        }
    }

    match User::unsubscribe(&state.pool, &claims.sub, &user_id).await {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(serde_json::json!({
                "subscribed": false
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub recipes_limit: Option<i64>,
}

#[axum::debug_handler]
pub async fn subscriptions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SubscriptionsQuery>,
) -> impl IntoResponse {
    let pagination = Pagination {
        page: query.page,
        limit: query.limit,
    };
    let limit = pagination.limit(state.config.page_size);
    let offset = pagination.offset(state.config.page_size);

    match build_subscription_page(&state, &claims.sub, limit, offset, query.recipes_limit).await {
        Ok(page) => (StatusCode::OK, success_to_api_response(page)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

// 订阅列表的每个作者都附带其菜谱缩略信息与总数
async fn build_subscription_page(
    state: &AppState,
    user_id: &str,
    limit: i64,
    offset: i64,
    recipes_limit: Option<i64>,
) -> Result<Paginated<SubscriptionInfo>, sqlx::Error> {
    let count = User::subscriptions_count(&state.pool, user_id).await?;
    let authors = User::subscriptions(&state.pool, user_id, limit, offset).await?;

    let mut results = Vec::with_capacity(authors.len());
    for author in authors {
        let recipes = Recipe::by_author_short(&state.pool, &author.user_id, recipes_limit).await?;
        let recipes_count = Recipe::count_by_author(&state.pool, &author.user_id).await?;
        results.push(SubscriptionInfo {
            id: author.user_id,
            email: author.email,
            username: author.username,
            first_name: author.first_name,
            last_name: author.last_name,
            avatar: author.avatar.as_deref().map(media_url),
            is_subscribed: true,
            recipes,
            recipes_count,
        });
    }

    Ok(Paginated { count, results })
}
