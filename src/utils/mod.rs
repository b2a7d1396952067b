use std::path::Path;

use axum::Json;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), DEFAULT_COST)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password.as_bytes(), hash)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // 用户ID
    pub exp: i64,    // 过期时间
    pub iat: i64,    // 签发时间
}

// 公开路由上的登录态，由 optional_auth_middleware 注入，匿名时为 None
#[derive(Debug, Clone)]
pub struct OptionalClaims(pub Option<Claims>);

pub fn generate_token(
    user_id: &str,
    config: &Config,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiration = now
        .checked_add_signed(Duration::seconds(config.jwt_expiration().as_secs() as i64))
        .expect("valid timestamp")
        .timestamp();

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
}

pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// 解码后的图片数据，文件扩展名取自 data URI 的 MIME 子类型
#[derive(Debug)]
pub struct DecodedImage {
    pub ext: String,
    pub bytes: Vec<u8>,
}

// 解析 "data:image/<fmt>;base64,<payload>" 形式的图片
pub fn decode_base64_image(data: &str) -> Result<DecodedImage, String> {
    let rest = data
        .strip_prefix("data:image/")
        .ok_or_else(|| "图片必须是 data:image 开头的 base64 数据".to_string())?;

    let (format, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| "图片数据缺少 base64 标记".to_string())?;

    if format.is_empty()
        || !format
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
    {
        return Err("无法识别的图片格式".to_string());
    }
    // "svg+xml" 这类子类型只保留主名
    let ext = format.split('+').next().unwrap_or(format).to_string();

    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| format!("图片 base64 解码失败: {}", e))?;
    if bytes.is_empty() {
        return Err("图片内容为空".to_string());
    }

    Ok(DecodedImage { ext, bytes })
}

// 写入媒体文件并返回相对路径，如 "avatars/<uuid>.png"
pub async fn save_media_file(
    media_root: &str,
    subdir: &str,
    image: &DecodedImage,
) -> std::io::Result<String> {
    let dir = Path::new(media_root).join(subdir);
    tokio::fs::create_dir_all(&dir).await?;

    let file_name = format!("{}.{}", Uuid::new_v4(), image.ext);
    tokio::fs::write(dir.join(&file_name), &image.bytes).await?;

    Ok(format!("{}/{}", subdir, file_name))
}

pub async fn remove_media_file(media_root: &str, relative: &str) {
    let path = Path::new(media_root).join(relative);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        tracing::warn!("Failed to remove media file {:?}: {}", path, e);
    }
}

pub fn media_url(relative: &str) -> String {
    format!("/media/{}", relative)
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_data: Option<T>,
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: 0,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

pub fn error_to_api_response<T>(code: i32, msg: String) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code,
        msg,
        resp_data: None,
    })
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const USER_EXISTS: i32 = 1001;
    pub const AUTH_FAILED: i32 = 1002;
    pub const PERMISSION_DENIED: i32 = 1003;
    pub const NOT_FOUND: i32 = 1004;
    pub const RATE_LIMIT: i32 = 1005;
    pub const INTERNAL_ERROR: i32 = 5000;
}

pub const MAX_PAGE_LIMIT: i64 = 100;

// 列表接口通用的分页参数
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl Pagination {
    pub fn limit(&self, default: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self, default: i64) -> i64 {
        (self.page.unwrap_or(1).max(1) - 1) * self.limit(default)
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub count: i64,
    pub results: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/test".into(),
            redis_url: "redis://localhost".into(),
            jwt_secret: "test-secret".into(),
            jwt_expiration_secs: 3600,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
            server_host: "127.0.0.1".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            media_root: "media".into(),
            page_size: 10,
        }
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("s3cret-пароль").unwrap();
        assert!(verify_password("s3cret-пароль", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn token_roundtrip() {
        let config = test_config();
        let token = generate_token("user-1", &config).unwrap();
        let claims = verify_token(&token, &config).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_rejects_wrong_secret() {
        let config = test_config();
        let token = generate_token("user-1", &config).unwrap();

        let mut other = test_config();
        other.jwt_secret = "another-secret".into();
        assert!(verify_token(&token, &other).is_err());
    }

    #[test]
    fn token_rejects_expired() {
        let config = test_config();
        let claims = Claims {
            sub: "user-1".into(),
            exp: Utc::now().timestamp() - 3600,
            iat: Utc::now().timestamp() - 7200,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap();
        assert!(verify_token(&token, &config).is_err());
    }

    #[test]
    fn decodes_png_data_uri() {
        // 1x1 透明 PNG
        let data = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";
        let image = decode_base64_image(data).unwrap();
        assert_eq!(image.ext, "png");
        assert_eq!(&image.bytes[1..4], b"PNG");
    }

    #[test]
    fn decode_keeps_main_subtype_only() {
        let data = format!("data:image/svg+xml;base64,{}", BASE64.encode("<svg/>"));
        let image = decode_base64_image(&data).unwrap();
        assert_eq!(image.ext, "svg");
        assert_eq!(image.bytes, b"<svg/>");
    }

    #[test]
    fn decode_rejects_bad_input() {
        assert!(decode_base64_image("not an image").is_err());
        assert!(decode_base64_image("data:image/png;base64,%%%%").is_err());
        assert!(decode_base64_image("data:image/png,AAAA").is_err());
        assert!(decode_base64_image("data:image/;base64,AAAA").is_err());
    }

    #[test]
    fn media_url_prefixes_relative_path() {
        assert_eq!(media_url("avatars/a.png"), "/media/avatars/a.png");
    }

    #[test]
    fn pagination_defaults() {
        let p = Pagination::default();
        assert_eq!(p.limit(10), 10);
        assert_eq!(p.offset(10), 0);
    }

    #[test]
    fn pagination_offset_and_clamp() {
        let p = Pagination {
            page: Some(3),
            limit: Some(20),
        };
        assert_eq!(p.limit(10), 20);
        assert_eq!(p.offset(10), 40);

        let oversized = Pagination {
            page: Some(0),
            limit: Some(100_000),
        };
        assert_eq!(oversized.limit(10), MAX_PAGE_LIMIT);
        assert_eq!(oversized.offset(10), 0);
    }

    #[test]
    fn error_response_skips_empty_data() {
        let Json(resp) = error_to_api_response::<()>(error_codes::NOT_FOUND, "缺失".into());
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["code"], error_codes::NOT_FOUND);
        assert!(value.get("resp_data").is_none());
    }
}
