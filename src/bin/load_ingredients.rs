use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

// 从CSV导入食材基础数据，行格式: 名称,单位
// 用法: load_ingredients [路径]，默认 data/ingredients.csv
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "data/ingredients.csv".to_string());

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres");

    let content = tokio::fs::read_to_string(&path)
        .await
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path, e));

    let mut inserted = 0u64;
    let mut skipped = 0u64;
    for line in content.lines() {
        let Some((name, unit)) = parse_line(line) else {
            skipped += 1;
            continue;
        };

        let result = sqlx::query(
            r#"
            INSERT INTO ingredients (ingredient_id, name, measurement_unit)
            VALUES ($1, $2, $3)
            ON CONFLICT (name, measurement_unit) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(unit)
        .execute(&pool)
        .await
        .unwrap_or_else(|e| panic!("Failed to insert ingredient {}: {}", name, e));

        inserted += result.rows_affected();
    }

    tracing::info!(
        "Loaded {} ingredients from {} ({} lines skipped)",
        inserted,
        path,
        skipped
    );
}

// 名称里可能含逗号，按最后一个逗号切分
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (name, unit) = line.rsplit_once(',')?;
    let name = name.trim().trim_matches('"');
    let unit = unit.trim();
    if name.is_empty() || unit.is_empty() {
        return None;
    }

    Some((name, unit))
}

#[cfg(test)]
mod tests {
    use super::parse_line;

    #[test]
    fn parses_simple_rows() {
        assert_eq!(parse_line("面粉,克"), Some(("面粉", "克")));
        assert_eq!(parse_line(" 牛奶 , 毫升 "), Some(("牛奶", "毫升")));
    }

    #[test]
    fn splits_on_last_comma() {
        assert_eq!(
            parse_line("\"salt, coarse\",g"),
            Some(("salt, coarse", "g"))
        );
    }

    #[test]
    fn skips_blank_and_partial_rows() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("面粉"), None);
        assert_eq!(parse_line("面粉,"), None);
        assert_eq!(parse_line(",克"), None);
    }
}
