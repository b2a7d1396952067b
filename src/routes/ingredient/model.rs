use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Ingredient {
    #[serde(rename = "id")]
    pub ingredient_id: String,
    pub name: String,
    pub measurement_unit: String,
}

impl Ingredient {
    // 名称模糊搜索，无关键字时返回全量（按名称排序）
    pub async fn search(pool: &PgPool, name: Option<&str>) -> Result<Vec<Self>, sqlx::Error> {
        let pattern = format!("%{}%", name.unwrap_or(""));

        sqlx::query_as::<_, Ingredient>(
            r#"
            SELECT ingredient_id, name, measurement_unit
            FROM ingredients
            WHERE name ILIKE $1
            ORDER BY name
            "#,
        )
        .bind(pattern)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        ingredient_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Ingredient>(
            "SELECT ingredient_id, name, measurement_unit FROM ingredients WHERE ingredient_id = $1",
        )
        .bind(ingredient_id)
        .fetch_optional(pool)
        .await
    }

    // 返回给定ID中实际存在的那部分，校验菜谱食材用
    pub async fn existing_ids(
        pool: &PgPool,
        ingredient_ids: &[String],
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT ingredient_id FROM ingredients WHERE ingredient_id = ANY($1)",
        )
        .bind(ingredient_ids.to_vec())
        .fetch_all(pool)
        .await
    }
}
