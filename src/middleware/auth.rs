use axum::{
    RequestExt,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::{
    AppState,
    utils::{Claims, OptionalClaims, error_codes, error_to_api_response, verify_token},
};

async fn bearer_claims(request: &mut Request<Body>, state: &AppState) -> Option<Claims> {
    let header = request
        .extract_parts::<TypedHeader<Authorization<Bearer>>>()
        .await
        .ok()?;
    verify_token(header.token(), &state.config).ok()
}

// 校验 Bearer token，通过后把 Claims 写入请求扩展
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match bearer_claims(&mut request, &state).await {
        Some(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            error_to_api_response::<()>(error_codes::AUTH_FAILED, "未授权访问".to_string()),
        )
            .into_response(),
    }
}

// 公开路由也尽量解析登录态，解析失败按匿名处理，不拦截请求
pub async fn optional_auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let claims = bearer_claims(&mut request, &state).await;
    request.extensions_mut().insert(OptionalClaims(claims));
    next.run(request).await
}
