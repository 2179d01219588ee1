//! Live-schema introspection: one submodule per backend kind, a shared
//! metadata model, and the materializer that writes the per-table YAML and
//! per-database OpenAPI files.

pub mod clickhouse;
pub mod emit;
pub mod heuristics;
pub mod mongo;
pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod swagger;

use crate::config::{DatabaseConfig, DbKind, SoftDeleteType};
use crate::error::AppError;
use heuristics::*;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct FieldMeta {
    pub name: String,
    pub ty: String,
    pub nullable: bool,
    pub is_primary: bool,
    pub is_unique: bool,
    pub auto_inc: bool,
    pub has_default: bool,
    pub default: Option<Value>,
    pub comment: String,
    pub on_update: bool,
}

#[derive(Clone, Debug, Default)]
pub struct TableMeta {
    pub name: String,
    pub alias: String,
    pub comment: String,
    pub primary_key: String,
    pub unique_keys: Vec<Vec<String>>,
    pub fields: Vec<FieldMeta>,
    pub softdel_key: String,
    pub softdel_type: Option<SoftDeleteType>,
    pub auto_update: BTreeMap<String, Value>,
    pub default_values: BTreeMap<String, Value>,
}

/// Extract table metadata for one database; the alias of each table starts
/// out as its physical name.
pub async fn extract_tables(db: &DatabaseConfig) -> Result<Vec<TableMeta>, AppError> {
    let mut tables = match db.kind {
        DbKind::MySql => mysql::extract(&db.dsn, &db.database).await?,
        DbKind::Postgres => postgres::extract(&db.dsn).await?,
        DbKind::Sqlite => sqlite::extract(&db.dsn).await?,
        DbKind::SqlServer => mssql::extract(&db.dsn).await?,
        DbKind::ClickHouse => clickhouse::extract(&db.dsn, &db.database).await?,
        DbKind::MongoDb => mongo::extract(&db.dsn, &db.database).await?,
    };
    for t in &mut tables {
        t.alias = t.name.clone();
    }
    Ok(tables)
}

fn parse_soft_delete_type(s: &str) -> Option<SoftDeleteType> {
    match s {
        "int" => Some(SoftDeleteType::Int),
        "boolean" => Some(SoftDeleteType::Boolean),
        "timestamp" => Some(SoftDeleteType::Timestamp),
        _ => None,
    }
}

/// Shared post-extraction pass for the relational backends: primary key,
/// default values, soft-delete marker, auto-update fields, unique-key dedup.
pub(crate) fn finish_table(table: &mut TableMeta) {
    if table.primary_key.is_empty() {
        if let Some(pk) = table.fields.iter().find(|f| f.is_primary) {
            table.primary_key = pk.name.clone();
        }
    }
    table.unique_keys = dedup_unique_keys(std::mem::take(&mut table.unique_keys));
    table.default_values = collect_default_values(&table.fields, &table.primary_key);
    for f in &table.fields {
        if is_soft_delete_field(&f.name) && table.softdel_key.is_empty() {
            table.softdel_key = f.name.clone();
            table.softdel_type = parse_soft_delete_type(guess_soft_delete_type(&f.ty));
        }
        if (is_auto_update_field(&f.name) || f.on_update) && is_time_type(&f.ty) {
            table.auto_update.insert(f.name.clone(), Value::from("{{now}}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_table_fills_everything() {
        let mut t = TableMeta {
            name: "user".into(),
            fields: vec![
                FieldMeta {
                    name: "id".into(),
                    ty: "bigint".into(),
                    is_primary: true,
                    ..FieldMeta::default()
                },
                FieldMeta {
                    name: "email".into(),
                    ty: "varchar(64)".into(),
                    is_unique: true,
                    ..FieldMeta::default()
                },
                FieldMeta {
                    name: "updated_at".into(),
                    ty: "datetime".into(),
                    ..FieldMeta::default()
                },
                FieldMeta {
                    name: "deleted_at".into(),
                    ty: "datetime".into(),
                    nullable: true,
                    ..FieldMeta::default()
                },
            ],
            unique_keys: vec![vec!["email".into()], vec!["email".into()]],
            ..TableMeta::default()
        };
        finish_table(&mut t);
        assert_eq!(t.primary_key, "id");
        assert_eq!(t.unique_keys, vec![vec!["email".to_string()]]);
        assert_eq!(t.softdel_key, "deleted_at");
        assert_eq!(t.softdel_type, Some(SoftDeleteType::Timestamp));
        assert!(t.auto_update.contains_key("updated_at"));
        assert_eq!(t.default_values["id"], Value::from("{{snowflake}}"));
    }
}
