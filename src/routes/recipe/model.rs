use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::routes::ingredient::model::Ingredient;
use crate::routes::user::model::{User, UserInfo};
use crate::utils::media_url;

pub const COOKING_TIME_MIN: i32 = 1;
pub const COOKING_TIME_MAX: i32 = 32000;
pub const AMOUNT_MIN: i32 = 1;
pub const AMOUNT_MAX: i32 = 32000;
pub const NAME_MAX_LEN: usize = 200;

// 缓存相关常量
const RECIPE_CACHE_EXPIRE: u64 = 600; // 菜谱缓存过期时间，单位秒
const RECIPE_CACHE_PREFIX: &str = "recipe:id:"; // 菜谱ID缓存前缀

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Recipe {
    pub recipe_id: String,
    pub author_id: Option<String>,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,
    pub created_at: DateTime<Utc>,
}

// 菜谱里的一行食材（食材信息加数量）
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecipeIngredientInfo {
    pub id: String,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

// 与查看者无关的菜谱核心，作为一个整体进缓存
#[derive(Debug, Serialize, Deserialize)]
pub struct RecipeCore {
    pub recipe: Recipe,
    pub ingredients: Vec<RecipeIngredientInfo>,
}

// 对外的完整菜谱视图
#[derive(Debug, Serialize)]
pub struct RecipeInfo {
    pub id: String,
    pub author: Option<UserInfo>,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,
    pub ingredients: Vec<RecipeIngredientInfo>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
}

#[derive(Debug, Serialize, FromRow)]
pub struct RecipeShort {
    pub id: String,
    pub name: String,
    pub image: String,
    pub cooking_time: i32,
}

#[derive(Debug, Deserialize)]
pub struct IngredientAmount {
    pub id: String,
    pub amount: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateRecipeRequest {
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,
    pub ingredients: Vec<IngredientAmount>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRecipeRequest {
    pub name: Option<String>,
    pub image: Option<String>,
    pub text: Option<String>,
    pub cooking_time: Option<i32>,
    pub ingredients: Option<Vec<IngredientAmount>>,
}

// 购物清单的一行：同名同单位的食材数量已合并
#[derive(Debug, Serialize, FromRow)]
pub struct ShoppingListItem {
    pub name: String,
    pub measurement_unit: String,
    pub total: i64,
}

#[derive(Debug, Default)]
pub struct RecipeFilter {
    pub author: Option<String>,
    pub favorited_by: Option<String>,
    pub in_cart_of: Option<String>,
}

pub fn validate_recipe_fields(
    name: &str,
    cooking_time: i32,
    ingredients: &[IngredientAmount],
) -> Result<(), String> {
    if name.trim().is_empty() || name.chars().count() > NAME_MAX_LEN {
        return Err(format!("名称不能为空且不超过{}个字符", NAME_MAX_LEN));
    }
    if !(COOKING_TIME_MIN..=COOKING_TIME_MAX).contains(&cooking_time) {
        return Err(format!(
            "烹饪时长必须在{}到{}分钟之间",
            COOKING_TIME_MIN, COOKING_TIME_MAX
        ));
    }
    if ingredients.is_empty() {
        return Err("至少需要一种食材".to_string());
    }

    let mut seen = HashSet::new();
    for item in ingredients {
        if !(AMOUNT_MIN..=AMOUNT_MAX).contains(&item.amount) {
            return Err(format!(
                "食材数量必须在{}到{}之间",
                AMOUNT_MIN, AMOUNT_MAX
            ));
        }
        if !seen.insert(item.id.as_str()) {
            return Err("食材不能重复".to_string());
        }
    }

    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// 购物清单导出为CSV文本，带表头
pub fn render_shopping_list_csv(items: &[ShoppingListItem]) -> String {
    let mut out = String::from("食材,数量,单位\n");
    for item in items {
        out.push_str(&format!(
            "{},{},{}\n",
            csv_field(&item.name),
            item.total,
            csv_field(&item.measurement_unit)
        ));
    }
    out
}

const RECIPE_COLUMNS: &str =
    "recipe_id, author_id, name, image, text, cooking_time, created_at";

impl Recipe {
    // 确认所有食材ID都存在，缺失时报 Protocol 错误由 handler 翻译
    async fn ensure_ingredients_exist(
        pool: &PgPool,
        items: &[IngredientAmount],
    ) -> Result<(), sqlx::Error> {
        let ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
        let existing = Ingredient::existing_ids(pool, &ids).await?;
        if existing.len() != ids.len() {
            return Err(sqlx::Error::Protocol("Ingredient not found".into()));
        }
        Ok(())
    }

    pub async fn create(
        pool: &PgPool,
        author_id: &str,
        name: &str,
        image: &str,
        text: &str,
        cooking_time: i32,
        items: &[IngredientAmount],
    ) -> Result<Self, sqlx::Error> {
        Self::ensure_ingredients_exist(pool, items).await?;

        let recipe_id = Uuid::new_v4().to_string();
        let mut tx = pool.begin().await?;

        let recipe = sqlx::query_as::<_, Recipe>(&format!(
            r#"
            INSERT INTO recipes (recipe_id, author_id, name, image, text, cooking_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {RECIPE_COLUMNS}
            "#
        ))
        .bind(&recipe_id)
        .bind(author_id)
        .bind(name)
        .bind(image)
        .bind(text)
        .bind(cooking_time)
        .fetch_one(&mut *tx)
        .await?;

        for item in items {
            sqlx::query(
                "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount) VALUES ($1, $2, $3)",
            )
            .bind(&recipe_id)
            .bind(&item.id)
            .bind(item.amount)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(recipe)
    }

    pub async fn find_row(pool: &PgPool, recipe_id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Recipe>(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes WHERE recipe_id = $1"
        ))
        .bind(recipe_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn ingredient_items(
        pool: &PgPool,
        recipe_id: &str,
    ) -> Result<Vec<RecipeIngredientInfo>, sqlx::Error> {
        sqlx::query_as::<_, RecipeIngredientInfo>(
            r#"
            SELECT ri.ingredient_id AS id, i.name, i.measurement_unit, ri.amount
            FROM recipe_ingredients ri
            JOIN ingredients i ON i.ingredient_id = ri.ingredient_id
            WHERE ri.recipe_id = $1
            ORDER BY i.name
            "#,
        )
        .bind(recipe_id)
        .fetch_all(pool)
        .await
    }

    // 菜谱核心读缓存，写操作负责失效
    pub async fn find_core(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        recipe_id: &str,
    ) -> Result<Option<RecipeCore>, sqlx::Error> {
        let cache_key = format!("{}{}", RECIPE_CACHE_PREFIX, recipe_id);

        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cached: redis::RedisResult<String> = conn.get(&cache_key).await;
            if let Ok(json_str) = cached {
                if let Ok(core) = serde_json::from_str::<RecipeCore>(&json_str) {
                    tracing::debug!("Get recipe from cache: {}", cache_key);
                    return Ok(Some(core));
                }
            }
        }

        let Some(recipe) = Self::find_row(pool, recipe_id).await? else {
            return Ok(None);
        };
        let ingredients = Self::ingredient_items(pool, recipe_id).await?;
        let core = RecipeCore {
            recipe,
            ingredients,
        };

        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            if let Ok(json_str) = serde_json::to_string(&core) {
                let _: Result<(), redis::RedisError> =
                    conn.set_ex(&cache_key, json_str, RECIPE_CACHE_EXPIRE).await;
                tracing::debug!("Set recipe to cache: {}", cache_key);
            }
        }

        Ok(Some(core))
    }

    pub async fn invalidate_cache(redis: &Arc<RedisClient>, recipe_id: &str) {
        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cache_key = format!("{}{}", RECIPE_CACHE_PREFIX, recipe_id);
            let _: Result<(), redis::RedisError> = conn.del(&cache_key).await;
        }
    }

    pub async fn update(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        recipe_id: &str,
        name: &str,
        image: Option<&str>,
        text: &str,
        cooking_time: i32,
        items: &[IngredientAmount],
    ) -> Result<Self, sqlx::Error> {
        Self::ensure_ingredients_exist(pool, items).await?;

        let mut tx = pool.begin().await?;

        let recipe = sqlx::query_as::<_, Recipe>(&format!(
            r#"
            UPDATE recipes
            SET name = $1, image = COALESCE($2, image), text = $3, cooking_time = $4
            WHERE recipe_id = $5
            RETURNING {RECIPE_COLUMNS}
            "#
        ))
        .bind(name)
        .bind(image)
        .bind(text)
        .bind(cooking_time)
        .bind(recipe_id)
        .fetch_one(&mut *tx)
        .await?;

        // 食材整组替换
        sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
            .bind(recipe_id)
            .execute(&mut *tx)
            .await?;
        for item in items {
            sqlx::query(
                "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount) VALUES ($1, $2, $3)",
            )
            .bind(recipe_id)
            .bind(&item.id)
            .bind(item.amount)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Self::invalidate_cache(redis, recipe_id).await;

        Ok(recipe)
    }

    // 删除菜谱，返回图片相对路径供清理文件
    pub async fn delete(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        recipe_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let image = sqlx::query_scalar::<_, String>(
            "DELETE FROM recipes WHERE recipe_id = $1 RETURNING image",
        )
        .bind(recipe_id)
        .fetch_optional(pool)
        .await?;

        Self::invalidate_cache(redis, recipe_id).await;

        Ok(image)
    }

    pub async fn list(
        pool: &PgPool,
        filter: &RecipeFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Recipe>(&format!(
            r#"
            SELECT {RECIPE_COLUMNS}
            FROM recipes r
            WHERE ($1::text IS NULL OR r.author_id = $1)
              AND ($2::text IS NULL OR EXISTS (
                    SELECT 1 FROM favourites f
                    WHERE f.recipe_id = r.recipe_id AND f.user_id = $2))
              AND ($3::text IS NULL OR EXISTS (
                    SELECT 1 FROM shopping_list s
                    WHERE s.recipe_id = r.recipe_id AND s.user_id = $3))
            ORDER BY r.created_at DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(&filter.author)
        .bind(&filter.favorited_by)
        .bind(&filter.in_cart_of)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn count(pool: &PgPool, filter: &RecipeFilter) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM recipes r
            WHERE ($1::text IS NULL OR r.author_id = $1)
              AND ($2::text IS NULL OR EXISTS (
                    SELECT 1 FROM favourites f
                    WHERE f.recipe_id = r.recipe_id AND f.user_id = $2))
              AND ($3::text IS NULL OR EXISTS (
                    SELECT 1 FROM shopping_list s
                    WHERE s.recipe_id = r.recipe_id AND s.user_id = $3))
            "#,
        )
        .bind(&filter.author)
        .bind(&filter.favorited_by)
        .bind(&filter.in_cart_of)
        .fetch_one(pool)
        .await
    }

    // 作者的菜谱缩略列表，订阅接口用；limit 为空则不截断
    pub async fn by_author_short(
        pool: &PgPool,
        author_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<RecipeShort>, sqlx::Error> {
        let rows = sqlx::query_as::<_, RecipeShort>(
            r#"
            SELECT recipe_id AS id, name, image, cooking_time
            FROM recipes
            WHERE author_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(author_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|mut short| {
                short.image = media_url(&short.image);
                short
            })
            .collect())
    }

    pub async fn count_by_author(pool: &PgPool, author_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM recipes WHERE author_id = $1")
            .bind(author_id)
            .fetch_one(pool)
            .await
    }

    pub async fn is_favorited(
        pool: &PgPool,
        user_id: &str,
        recipe_id: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM favourites WHERE user_id = $1 AND recipe_id = $2)",
        )
        .bind(user_id)
        .bind(recipe_id)
        .fetch_one(pool)
        .await
    }

    pub async fn add_favorite(
        pool: &PgPool,
        user_id: &str,
        recipe_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO favourites (user_id, recipe_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, recipe_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(recipe_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn remove_favorite(
        pool: &PgPool,
        user_id: &str,
        recipe_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM favourites WHERE user_id = $1 AND recipe_id = $2")
            .bind(user_id)
            .bind(recipe_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn is_in_shopping_cart(
        pool: &PgPool,
        user_id: &str,
        recipe_id: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM shopping_list WHERE user_id = $1 AND recipe_id = $2)",
        )
        .bind(user_id)
        .bind(recipe_id)
        .fetch_one(pool)
        .await
    }

    pub async fn add_to_cart(
        pool: &PgPool,
        user_id: &str,
        recipe_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO shopping_list (user_id, recipe_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, recipe_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(recipe_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn remove_from_cart(
        pool: &PgPool,
        user_id: &str,
        recipe_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM shopping_list WHERE user_id = $1 AND recipe_id = $2")
            .bind(user_id)
            .bind(recipe_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    // 汇总购物车里所有菜谱的食材：同名同单位的数量求和
    pub async fn shopping_list(
        pool: &PgPool,
        user_id: &str,
    ) -> Result<Vec<ShoppingListItem>, sqlx::Error> {
        sqlx::query_as::<_, ShoppingListItem>(
            r#"
            SELECT i.name, i.measurement_unit, SUM(ri.amount)::bigint AS total
            FROM shopping_list s
            JOIN recipe_ingredients ri ON ri.recipe_id = s.recipe_id
            JOIN ingredients i ON i.ingredient_id = ri.ingredient_id
            WHERE s.user_id = $1
            GROUP BY i.name, i.measurement_unit
            ORDER BY i.name
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }
}

impl RecipeCore {
    // 补齐作者信息与查看者相关标记，组装对外视图
    pub async fn into_info(
        self,
        pool: &PgPool,
        viewer: Option<&str>,
    ) -> Result<RecipeInfo, sqlx::Error> {
        let author = match self.recipe.author_id.as_deref() {
            Some(author_id) => match User::find_by_id(pool, author_id).await? {
                Some(user) => {
                    let is_subscribed = match viewer {
                        Some(viewer_id) => {
                            User::is_subscribed(pool, viewer_id, author_id).await?
                        }
                        None => false,
                    };
                    Some(UserInfo::from_user(user, is_subscribed))
                }
                None => None,
            },
            None => None,
        };

        let (is_favorited, is_in_shopping_cart) = match viewer {
            Some(viewer_id) => (
                Recipe::is_favorited(pool, viewer_id, &self.recipe.recipe_id).await?,
                Recipe::is_in_shopping_cart(pool, viewer_id, &self.recipe.recipe_id).await?,
            ),
            None => (false, false),
        };

        Ok(RecipeInfo {
            id: self.recipe.recipe_id,
            author,
            name: self.recipe.name,
            image: media_url(&self.recipe.image),
            text: self.recipe.text,
            cooking_time: self.recipe.cooking_time,
            ingredients: self.ingredients,
            is_favorited,
            is_in_shopping_cart,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(pairs: &[(&str, i32)]) -> Vec<IngredientAmount> {
        pairs
            .iter()
            .map(|(id, amount)| IngredientAmount {
                id: (*id).to_string(),
                amount: *amount,
            })
            .collect()
    }

    #[test]
    fn validates_complete_recipe() {
        let ok = items(&[("a", 100), ("b", 1)]);
        assert!(validate_recipe_fields("红烧肉", 45, &ok).is_ok());
    }

    #[test]
    fn rejects_bad_name() {
        let ok = items(&[("a", 1)]);
        assert!(validate_recipe_fields("", 45, &ok).is_err());
        assert!(validate_recipe_fields("   ", 45, &ok).is_err());
        assert!(validate_recipe_fields(&"名".repeat(201), 45, &ok).is_err());
        assert!(validate_recipe_fields(&"名".repeat(200), 45, &ok).is_ok());
    }

    #[test]
    fn rejects_cooking_time_out_of_range() {
        let ok = items(&[("a", 1)]);
        assert!(validate_recipe_fields("汤", 0, &ok).is_err());
        assert!(validate_recipe_fields("汤", 32001, &ok).is_err());
        assert!(validate_recipe_fields("汤", 32000, &ok).is_ok());
    }

    #[test]
    fn rejects_empty_or_duplicated_ingredients() {
        assert!(validate_recipe_fields("汤", 10, &[]).is_err());
        assert!(validate_recipe_fields("汤", 10, &items(&[("a", 1), ("a", 2)])).is_err());
    }

    #[test]
    fn rejects_amount_out_of_range() {
        assert!(validate_recipe_fields("汤", 10, &items(&[("a", 0)])).is_err());
        assert!(validate_recipe_fields("汤", 10, &items(&[("a", 32001)])).is_err());
    }

    #[test]
    fn renders_shopping_list_with_header() {
        let csv = render_shopping_list_csv(&[
            ShoppingListItem {
                name: "土豆".into(),
                measurement_unit: "克".into(),
                total: 700,
            },
            ShoppingListItem {
                name: "牛奶".into(),
                measurement_unit: "毫升".into(),
                total: 250,
            },
        ]);
        assert_eq!(csv, "食材,数量,单位\n土豆,700,克\n牛奶,250,毫升\n");
    }

    #[test]
    fn renders_empty_shopping_list() {
        assert_eq!(render_shopping_list_csv(&[]), "食材,数量,单位\n");
    }

    #[test]
    fn quotes_fields_with_delimiters() {
        let csv = render_shopping_list_csv(&[ShoppingListItem {
            name: "salt, coarse \"sea\"".into(),
            measurement_unit: "g".into(),
            total: 10,
        }]);
        assert_eq!(
            csv,
            "食材,数量,单位\n\"salt, coarse \"\"sea\"\"\",10,g\n"
        );
    }

    #[test]
    fn recipe_core_cache_roundtrip() {
        let core = RecipeCore {
            recipe: Recipe {
                recipe_id: "r1".into(),
                author_id: Some("u1".into()),
                name: "葱油面".into(),
                image: "recipes/images/a.png".into(),
                text: "下面，浇葱油".into(),
                cooking_time: 15,
                created_at: Utc::now(),
            },
            ingredients: vec![RecipeIngredientInfo {
                id: "i1".into(),
                name: "面条".into(),
                measurement_unit: "克".into(),
                amount: 200,
            }],
        };

        let json = serde_json::to_string(&core).unwrap();
        let parsed: RecipeCore = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.recipe.recipe_id, "r1");
        assert_eq!(parsed.ingredients.len(), 1);
        assert_eq!(parsed.ingredients[0].amount, 200);
    }
}
