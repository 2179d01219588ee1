//! SQLite introspection via `sqlite_master` and the table/index pragmas.

use crate::error::AppError;
use crate::meta::heuristics::convert_default_by_type;
use crate::meta::{finish_table, FieldMeta, TableMeta};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::Row;

fn quote_literal(s: &str) -> String {
    s.replace('\'', "''")
}

pub async fn extract(dsn: &str) -> Result<Vec<TableMeta>, AppError> {
    let pool = SqlitePoolOptions::new().max_connections(2).connect(dsn).await?;
    let table_rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' LIMIT 500")
        .fetch_all(&pool)
        .await?;

    let mut tables = Vec::new();
    for row in table_rows {
        let name: String = row.try_get(0)?;
        if name.starts_with("sqlite_") {
            continue;
        }
        match extract_one(&pool, &name).await {
            Ok(mut table) => {
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

async fn extract_one(pool: &sqlx::SqlitePool, table: &str) -> Result<TableMeta, AppError> {
    let rows = sqlx::query(&format!("PRAGMA table_info('{}')", quote_literal(table)))
        .fetch_all(pool)
        .await?;

    let mut fields = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get("name")?;
        let ty: String = row.try_get("type")?;
        let notnull: i64 = row.try_get("notnull")?;
        let default: Option<String> = row.try_get("dflt_value")?;
        let pk: i64 = row.try_get("pk")?;
        let nullable = notnull == 0;
        fields.push(FieldMeta {
            ty: ty.clone(),
            nullable,
            is_primary: pk > 0,
            // INTEGER PRIMARY KEY is a rowid alias and self-assigns
            auto_inc: pk > 0 && ty.eq_ignore_ascii_case("integer"),
            has_default: default.is_some(),
            default: convert_default_by_type(default.as_deref().unwrap_or(""), &ty, nullable),
            name,
            ..FieldMeta::default()
        });
    }

    let mut unique_keys = Vec::new();
    let idx_rows = sqlx::query(&format!("PRAGMA index_list('{}')", quote_literal(table)))
        .fetch_all(pool)
        .await?;
    for row in idx_rows {
        let idx_name: String = row.try_get("name")?;
        let unique: i64 = row.try_get("unique")?;
        let origin: String = row.try_get("origin")?;
        if unique != 1 || origin == "pk" {
            continue;
        }
        let col_rows = sqlx::query(&format!("PRAGMA index_info('{}')", quote_literal(&idx_name)))
            .fetch_all(pool)
            .await?;
        let mut cols = Vec::new();
        for col_row in col_rows {
            let col: Option<String> = col_row.try_get("name")?;
            if let Some(col) = col {
                cols.push(col);
            }
        }
        if !cols.is_empty() {
            unique_keys.push(cols);
        }
    }

    Ok(TableMeta {
        name: table.to_string(),
        fields,
        unique_keys,
        ..TableMeta::default()
    })
}
