//! MongoDB introspection: sample up to 100 documents per collection and
//! unify field types through the merge lattice; unique keys come from the
//! index metadata.

use crate::config::SoftDeleteType;
use crate::error::AppError;
use crate::meta::heuristics::{
    dedup_unique_keys, is_auto_update_field, is_response_readonly_field, is_soft_delete_field, is_time_type,
    merge_swagger_type,
};
use crate::meta::{FieldMeta, TableMeta};
use bson::{doc, Bson, Document};
use futures_util::TryStreamExt;
use mongodb::Client;
use serde_json::json;
use std::collections::BTreeMap;

const SAMPLE_LIMIT: i64 = 100;

fn bson_swagger_type(v: &Bson) -> &'static str {
    match v {
        Bson::Int32(_) | Bson::Int64(_) => "integer",
        Bson::Double(_) | Bson::Decimal128(_) => "number",
        Bson::Boolean(_) => "boolean",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        _ => "string",
    }
}

pub async fn extract(dsn: &str, db_name: &str) -> Result<Vec<TableMeta>, AppError> {
    let client = Client::with_uri_str(dsn).await?;
    let database = client.database(db_name);
    let names = database.list_collection_names().await?;

    let mut tables = Vec::new();
    for name in names {
        match extract_one(&database, &name).await {
            Ok(table) => tables.push(table),
            Err(e) => {
                tracing::warn!(collection = %name, error = %e, "skipping collection");
            }
        }
    }
    client.shutdown().await;
    Ok(tables)
}

async fn extract_one(database: &mongodb::Database, name: &str) -> Result<TableMeta, AppError> {
    let collection = database.collection::<Document>(name);

    let mut field_types: BTreeMap<String, &'static str> = BTreeMap::new();
    let mut cursor = collection.find(doc! {}).limit(SAMPLE_LIMIT).await?;
    while let Some(document) = cursor.try_next().await? {
        for (key, value) in &document {
            let ty = bson_swagger_type(value);
            field_types
                .entry(key.clone())
                .and_modify(|t| *t = merge_swagger_type(t, ty))
                .or_insert(ty);
        }
    }

    let mut unique_keys = Vec::new();
    let mut index_cursor = collection.list_indexes().await?;
    while let Some(index) = index_cursor.try_next().await? {
        let unique = index.options.as_ref().and_then(|o| o.unique).unwrap_or(false);
        if !unique {
            continue;
        }
        let cols: Vec<String> = index.keys.keys().filter(|k| *k != "_id").cloned().collect();
        if !cols.is_empty() {
            unique_keys.push(cols);
        }
    }

    let mut table = TableMeta {
        name: name.to_string(),
        unique_keys: dedup_unique_keys(unique_keys),
        ..TableMeta::default()
    };
    for (field_name, ty) in &field_types {
        let is_primary = field_name == "_id";
        if is_primary {
            table.primary_key = field_name.clone();
        }
        let time_like = is_time_type(ty) || is_time_type(field_name);
        if is_soft_delete_field(field_name) && table.softdel_key.is_empty() {
            table.softdel_key = field_name.clone();
            table.softdel_type = Some(match *ty {
                "integer" => SoftDeleteType::Int,
                "boolean" => SoftDeleteType::Boolean,
                _ => SoftDeleteType::Timestamp,
            });
        }
        if is_auto_update_field(field_name) && time_like {
            table.auto_update.insert(field_name.clone(), json!("{{now}}"));
        }
        if !is_primary {
            if is_response_readonly_field(field_name) && time_like {
                table.default_values.insert(field_name.clone(), json!("{{now}}"));
            } else if is_soft_delete_field(field_name) {
                table.default_values.insert(field_name.clone(), json!(""));
            }
        }
        table.fields.push(FieldMeta {
            name: field_name.clone(),
            ty: ty.to_string(),
            is_primary,
            ..FieldMeta::default()
        });
    }
    Ok(table)
}
