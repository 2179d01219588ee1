//! PostgreSQL catalog introspection (`information_schema` + comment
//! lookups); the `public` schema only, like the other relational kinds.

use crate::error::AppError;
use crate::meta::heuristics::convert_default_by_type;
use crate::meta::{finish_table, FieldMeta, TableMeta};
use sqlx::postgres::PgPoolOptions;
use sqlx::Row;

pub async fn extract(dsn: &str) -> Result<Vec<TableMeta>, AppError> {
    let pool = PgPoolOptions::new().max_connections(2).connect(dsn).await?;
    let table_rows = sqlx::query(
        "SELECT table_name, COALESCE(obj_description(('\"' || table_schema || '\".\"' || table_name || '\"')::regclass), '') \
         FROM information_schema.tables \
         WHERE table_schema = 'public' AND table_type = 'BASE TABLE' LIMIT 500",
    )
    .fetch_all(&pool)
    .await?;

    let mut tables = Vec::new();
    for row in table_rows {
        let name: String = row.try_get(0)?;
        let comment: String = row.try_get(1)?;
        match extract_one(&pool, &name).await {
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

async fn extract_one(pool: &sqlx::PgPool, table: &str) -> Result<TableMeta, AppError> {
    let rows = sqlx::query(
        "SELECT column_name, data_type, is_nullable, column_default, \
                col_description(('\"' || table_schema || '\".\"' || table_name || '\"')::regclass, ordinal_position) \
         FROM information_schema.columns \
         WHERE table_schema = 'public' AND table_name = $1 \
         ORDER BY ordinal_position",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut fields = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get(0)?;
        let ty: String = row.try_get(1)?;
        let nullable: String = row.try_get(2)?;
        let default: Option<String> = row.try_get(3)?;
        let comment: Option<String> = row.try_get(4)?;
        let nullable = nullable == "YES";
        let auto_inc = default
            .as_deref()
            .map(|d| d.starts_with("nextval("))
            .unwrap_or(false);
        fields.push(FieldMeta {
            ty: ty.clone(),
            nullable,
            auto_inc,
            has_default: default.is_some(),
            default: convert_default_by_type(default.as_deref().unwrap_or(""), &ty, nullable),
            comment: comment.unwrap_or_default(),
            name,
            ..FieldMeta::default()
        });
    }

    let pk: Option<String> = sqlx::query_scalar(
        "SELECT kcu.column_name \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu ON tc.constraint_name = kcu.constraint_name \
         WHERE tc.table_schema = 'public' AND tc.table_name = $1 AND tc.constraint_type = 'PRIMARY KEY' \
         LIMIT 1",
    )
    .bind(table)
    .fetch_optional(pool)
    .await?;
    if let Some(pk) = &pk {
        for f in &mut fields {
            if f.name == *pk {
                f.is_primary = true;
            }
        }
    }

    let uniq_rows = sqlx::query(
        "SELECT tc.constraint_name, kcu.column_name \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu ON tc.constraint_name = kcu.constraint_name \
         WHERE tc.table_schema = 'public' AND tc.table_name = $1 AND tc.constraint_type = 'UNIQUE' \
         ORDER BY tc.constraint_name, kcu.ordinal_position",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;
    let mut groups: std::collections::BTreeMap<String, Vec<String>> = Default::default();
    for row in uniq_rows {
        let idx: String = row.try_get(0)?;
        let col: String = row.try_get(1)?;
        groups.entry(idx).or_default().push(col);
    }

    Ok(TableMeta {
        name: table.to_string(),
        primary_key: pk.unwrap_or_default(),
        fields,
        unique_keys: groups.into_values().collect(),
        ..TableMeta::default()
    })
}
