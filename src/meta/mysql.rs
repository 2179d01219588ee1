//! MySQL catalog introspection (`information_schema`).

use crate::error::AppError;
use crate::meta::heuristics::convert_default_by_type;
use crate::meta::{finish_table, FieldMeta, TableMeta};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::Row;

pub async fn extract(dsn: &str, db_name: &str) -> Result<Vec<TableMeta>, AppError> {
    let pool = MySqlPoolOptions::new().max_connections(2).connect(dsn).await?;
    let table_rows = sqlx::query(
        "SELECT TABLE_NAME, IFNULL(TABLE_COMMENT, '') \
         FROM information_schema.tables WHERE TABLE_SCHEMA = ? LIMIT 500",
    )
    .bind(db_name)
    .fetch_all(&pool)
    .await?;

    let mut tables = Vec::new();
    for row in table_rows {
        let name: String = row.try_get(0)?;
        let comment: String = row.try_get(1)?;
        match extract_one(&pool, db_name, &name).await {
            Ok(mut table) => {
                table.comment = comment;
                finish_table(&mut table);
                tables.push(table);
            }
            Err(e) => {
                tracing::warn!(table = %name, error = %e, "skipping table");
            }
        }
    }
    pool.close().await;
    Ok(tables)
}

async fn extract_one(pool: &sqlx::MySqlPool, db_name: &str, table: &str) -> Result<TableMeta, AppError> {
    let rows = sqlx::query(
        "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_KEY, EXTRA, COLUMN_DEFAULT, IFNULL(COLUMN_COMMENT, '') \
         FROM information_schema.columns \
         WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
         ORDER BY ORDINAL_POSITION",
    )
    .bind(db_name)
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut fields = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get(0)?;
        let ty: String = row.try_get(1)?;
        let nullable: String = row.try_get(2)?;
        let col_key: String = row.try_get(3)?;
        let extra: String = row.try_get(4)?;
        let default: Option<String> = row.try_get(5)?;
        let comment: String = row.try_get(6)?;
        let nullable = nullable == "YES";
        fields.push(FieldMeta {
            ty: ty.clone(),
            nullable,
            is_primary: col_key == "PRI",
            is_unique: col_key == "UNI",
            auto_inc: extra.contains("auto_increment"),
            has_default: default.is_some(),
            default: convert_default_by_type(default.as_deref().unwrap_or(""), &ty, nullable),
            comment,
            on_update: extra.contains("on update"),
            name,
        });
    }

    // composite unique indexes, primary excluded
    let idx_rows = sqlx::query(
        "SELECT INDEX_NAME, COLUMN_NAME FROM information_schema.statistics \
         WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND NON_UNIQUE = 0 AND INDEX_NAME != 'PRIMARY' \
         ORDER BY INDEX_NAME, SEQ_IN_INDEX",
    )
    .bind(db_name)
    .bind(table)
    .fetch_all(pool)
    .await?;
    let mut groups: std::collections::BTreeMap<String, Vec<String>> = Default::default();
    for row in idx_rows {
        let idx: String = row.try_get(0)?;
        let col: String = row.try_get(1)?;
        groups.entry(idx).or_default().push(col);
    }

    Ok(TableMeta {
        name: table.to_string(),
        fields,
        unique_keys: groups.into_values().collect(),
        ..TableMeta::default()
    })
}
