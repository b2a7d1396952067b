use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::routes::recipe::model::RecipeShort;
use crate::utils::{hash_password, media_url, verify_password};

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: String,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub password_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

// 对外的用户画像，带相对查看者的订阅标记
#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
    pub avatar: Option<String>,
}

impl UserInfo {
    pub fn from_user(user: User, is_subscribed: bool) -> Self {
        Self {
            id: user.user_id,
            email: user.email,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            is_subscribed,
            avatar: user.avatar.as_deref().map(media_url),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct SetPasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct AvatarRequest {
    pub avatar: String,
}

#[derive(Debug, Serialize)]
pub struct AvatarResponse {
    pub avatar: Option<String>,
}

// 订阅列表里的作者条目，附带其菜谱
#[derive(Debug, Serialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub is_subscribed: bool,
    pub recipes: Vec<RecipeShort>,
    pub recipes_count: i64,
}

pub fn valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.len() <= 150
        && username.chars().all(|c| c.is_alphanumeric() || c == '_')
}

const USER_COLUMNS: &str =
    "user_id, email, username, first_name, last_name, avatar, password_hash";

impl User {
    pub async fn create(pool: &PgPool, req: CreateUserRequest) -> Result<Self, sqlx::Error> {
        let password_hash = hash_password(&req.password)
            .map_err(|e| sqlx::Error::Protocol(format!("Failed to hash password: {}", e)))?;
        let user_id = Uuid::new_v4().to_string();

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (user_id, email, username, first_name, last_name, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user_id)
        .bind(&req.email)
        .bind(&req.username)
        .bind(&req.first_name)
        .bind(&req.last_name)
        .bind(&password_hash)
        .fetch_one(pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_id(pool: &PgPool, user_id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY username LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(pool)
            .await
    }

    pub async fn verify_login(&self, password: &str) -> Result<bool, bcrypt::BcryptError> {
        verify_password(password, &self.password_hash)
    }

    pub async fn set_password(
        pool: &PgPool,
        user_id: &str,
        password: &str,
    ) -> Result<(), sqlx::Error> {
        let password_hash = hash_password(password)
            .map_err(|e| sqlx::Error::Protocol(format!("Failed to hash password: {}", e)))?;

        sqlx::query("UPDATE users SET password_hash = $1 WHERE user_id = $2")
            .bind(&password_hash)
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn update_avatar(
        pool: &PgPool,
        user_id: &str,
        avatar: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET avatar = $1 WHERE user_id = $2")
            .bind(avatar)
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn is_subscribed(
        pool: &PgPool,
        user_id: &str,
        author_id: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE user_id = $1 AND author_id = $2)",
        )
        .bind(user_id)
        .bind(author_id)
        .fetch_one(pool)
        .await
    }

    // 查看者订阅的全部作者ID，列表接口用来一次性算出 is_subscribed
    pub async fn subscribed_author_ids(
        pool: &PgPool,
        user_id: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT author_id FROM subscriptions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn subscribe(
        pool: &PgPool,
        user_id: &str,
        author_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, author_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, author_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(author_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn unsubscribe(
        pool: &PgPool,
        user_id: &str,
        author_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM subscriptions WHERE user_id = $1 AND author_id = $2")
            .bind(user_id)
            .bind(author_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn subscriptions(
        pool: &PgPool,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT u.user_id, u.email, u.username, u.first_name, u.last_name,
                   u.avatar, u.password_hash
            FROM users u
            JOIN subscriptions s ON s.author_id = u.user_id
            WHERE s.user_id = $1
            ORDER BY u.username
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn subscriptions_count(pool: &PgPool, user_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_allows_word_characters() {
        assert!(valid_username("chef_01"));
        assert!(valid_username("厨师长"));
        assert!(!valid_username(""));
        assert!(!valid_username("has space"));
        assert!(!valid_username("semi;colon"));
        assert!(!valid_username(&"x".repeat(151)));
    }

    #[test]
    fn user_info_builds_media_url() {
        let user = User {
            user_id: "u1".into(),
            email: "a@b.c".into(),
            username: "chef".into(),
            first_name: "A".into(),
            last_name: "B".into(),
            avatar: Some("avatars/a.png".into()),
            password_hash: "hash".into(),
        };
        let info = UserInfo::from_user(user, true);
        assert_eq!(info.avatar.as_deref(), Some("/media/avatars/a.png"));
        assert!(info.is_subscribed);
    }

    #[test]
    fn user_info_serializes_without_password() {
        let user = User {
            user_id: "u1".into(),
            email: "a@b.c".into(),
            username: "chef".into(),
            first_name: "A".into(),
            last_name: "B".into(),
            avatar: None,
            password_hash: "hash".into(),
        };
        let value = serde_json::to_value(UserInfo::from_user(user, false)).unwrap();
        assert!(value.get("password_hash").is_none());
        assert_eq!(value["id"], "u1");
    }
}
