//! ClickHouse introspection over the HTTP interface (`system.tables` +
//! `DESCRIBE TABLE`). ClickHouse has no unique indexes or auto-increment;
//! only columns, types and default expressions come out.

use crate::adapter::clickhouse::ClickHouseHttp;
use crate::error::AppError;
use crate::meta::heuristics::convert_default_by_type;
use crate::meta::{finish_table, FieldMeta, TableMeta};

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

pub async fn extract(dsn: &str, db_name: &str) -> Result<Vec<TableMeta>, AppError> {
    let http = ClickHouseHttp::new(dsn, db_name)?;
    let rows = http
        .query_json(
            db_name,
            &format!("SELECT name FROM system.tables WHERE database = '{}' LIMIT 500", escape(db_name)),
        )
        .await?;
    let names: Vec<String> = rows
        .iter()
        .filter_map(|r| r.get("name").and_then(|v| v.as_str()).map(|s| s.to_string()))
        .collect();

    let mut tables = Vec::new();
    for name in names {
        match extract_one(&http, db_name, &name).await {
            Ok(mut table) => {
                finish_table(&mut table);
                tables.push(table);
            }
            Err(e) => {
                tracing::warn!(table = %name, error = %e, "skipping table");
            }
        }
    }
    Ok(tables)
}

async fn extract_one(http: &ClickHouseHttp, db_name: &str, table: &str) -> Result<TableMeta, AppError> {
    let rows = http
        .query_json(
            db_name,
            &format!(
                "DESCRIBE TABLE `{}`.`{}`",
                db_name.replace('`', "\\`"),
                table.replace('`', "\\`")
            ),
        )
        .await?;

    let mut fields = Vec::with_capacity(rows.len());
    for row in &rows {
        let name = row.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let raw_ty = row.get("type").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let nullable = raw_ty.starts_with("Nullable(");
        let ty = raw_ty
            .trim_start_matches("Nullable(")
            .trim_end_matches(')')
            .to_string();
        let default_expr = row
            .get("default_expression")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let comment = row.get("comment").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        fields.push(FieldMeta {
            nullable,
            has_default: !default_expr.is_empty(),
            default: convert_default_by_type(&default_expr, &ty, nullable),
            comment,
            ty,
            name,
            ..FieldMeta::default()
        });
    }

    Ok(TableMeta {
        name: table.to_string(),
        fields,
        ..TableMeta::default()
    })
}
