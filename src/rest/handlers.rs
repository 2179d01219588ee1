//! REST handlers: list/create/update/delete plus the batch variants, with
//! default-value application, auto-update stamping, composite-key lookups,
//! the count cache and primary-key string normalization.

use crate::adapter::filter::{PARAM_FIELDS, PARAM_KEY, PARAM_ORDER, PARAM_PAGE, PARAM_PAGE_SIZE};
use crate::adapter::{filter::parse_filter_value, ListParams, Record};
use crate::config::{DefaultValue, TableConfig};
use crate::error::AppError;
use crate::idgen;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Evaluate configured defaults for one row: absent, null and empty-string
/// fields get the literal or a freshly generated template value.
pub fn apply_default_values(record: &mut Record, table: &TableConfig) -> Result<(), AppError> {
    for (field, default) in &table.default_values {
        let missing = match record.get(field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        };
        if !missing {
            continue;
        }
        let value = match default {
            DefaultValue::Now => Value::String(idgen::now_timestamp()),
            DefaultValue::Snowflake => Value::String(idgen::snowflake_id()?),
            DefaultValue::Ulid => Value::String(idgen::ulid_id()),
            DefaultValue::UuidV4 => Value::String(idgen::uuid_v4()),
            DefaultValue::UuidV7 => Value::String(idgen::uuid_v7()),
            DefaultValue::Literal(v) => v.clone(),
        };
        record.insert(field.clone(), value);
    }
    Ok(())
}

/// Stamp every auto-update field with the current time.
pub fn apply_auto_update_fields(record: &mut Record, table: &TableConfig) {
    if table.auto_update_fields.is_empty() {
        return;
    }
    let now = idgen::now_timestamp();
    for field in &table.auto_update_fields {
        record.insert(field.clone(), Value::String(now.clone()));
    }
}

/// Emit the primary key as a decimal string in every nested object, so
/// clients in languages with 53-bit numbers never lose precision.
pub fn normalize_pk_values(value: &mut Value, pk: &str) {
    if pk.is_empty() {
        return;
    }
    match value {
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                if k == pk {
                    match v {
                        Value::Number(n) => {
                            if let Some(i) = n.as_i64() {
                                *v = Value::String(i.to_string());
                            } else if let Some(u) = n.as_u64() {
                                *v = Value::String(u.to_string());
                            } else if let Some(f) = n.as_f64() {
                                *v = Value::String(format!("{:.0}", f));
                            }
                        }
                        other => normalize_pk_values(other, pk),
                    }
                } else {
                    normalize_pk_values(v, pk);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize_pk_values(item, pk);
            }
        }
        _ => {}
    }
}

fn body_to_records(body: Value) -> Result<Vec<Record>, AppError> {
    let Value::Array(items) = body else {
        return Err(AppError::BadRequest("Invalid JSON payload: expected an array".into()));
    };
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Object(map) => records.push(map),
            _ => return Err(AppError::BadRequest("Invalid JSON payload: expected objects".into())),
        }
    }
    Ok(records)
}

/// Batch-delete bodies are either plain ids or objects carrying the primary
/// key.
pub fn batch_delete_ids(body: &Value, pk: &str) -> Result<Vec<Value>, AppError> {
    let Some(items) = body.as_array() else {
        return Err(AppError::BadRequest(
            "Invalid JSON payload. Expected array of IDs or array of objects with primary keys.".into(),
        ));
    };
    if items.is_empty() {
        return Err(AppError::BadRequest("No IDs provided for deletion".into()));
    }
    if items.iter().all(|i| i.is_object()) {
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = item
                .get(pk)
                .ok_or_else(|| AppError::BadRequest(format!("Record in array missing primary key '{}'", pk)))?;
            ids.push(id.clone());
        }
        Ok(ids)
    } else {
        Ok(items.to_vec())
    }
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
}

/// Resolve the `/:id` segment (plus optional `?key=`) into an equality
/// filter; a `key` combination must match a configured unique-key group.
fn id_filter(table: &TableConfig, id: &str, key_param: &str) -> Result<Record, AppError> {
    let key_fields = split_csv(key_param);
    let mut filter = Record::new();
    if !key_fields.is_empty() {
        if !table.is_valid_key_combination(&key_fields) {
            return Err(AppError::BadRequest(format!(
                "Key combination '{:?}' is not a configured unique key",
                key_fields
            )));
        }
        let values: Vec<&str> = id.split(',').collect();
        if values.len() != key_fields.len() {
            return Err(AppError::BadRequest(
                "id value count does not match unique key fields".into(),
            ));
        }
        for (field, value) in key_fields.into_iter().zip(values) {
            filter.insert(field, parse_filter_value(value));
        }
    } else {
        if table.primary_key.is_empty() {
            return Err(AppError::Backend(
                "No identifiable key (primary or unique) configured for table".into(),
            ));
        }
        filter.insert(table.primary_key.clone(), parse_filter_value(id));
    }
    Ok(filter)
}

fn list_params(state: &AppState, params: &HashMap<String, String>) -> ListParams {
    let base = &state.config.base;
    let mut page: i64 = params.get(PARAM_PAGE).and_then(|v| v.parse().ok()).unwrap_or(base.default_page);
    let mut page_size: i64 = params
        .get(PARAM_PAGE_SIZE)
        .and_then(|v| v.parse().ok())
        .unwrap_or(base.default_page_size);
    if page <= 0 {
        page = base.default_page;
    }
    if page_size <= 0 {
        page_size = base.default_page_size;
    }
    if page_size > base.max_page_size {
        page_size = base.max_page_size;
    }
    let filters: Vec<(String, String)> = params
        .iter()
        .filter(|(k, _)| {
            k.as_str() != PARAM_PAGE && k.as_str() != PARAM_PAGE_SIZE && k.as_str() != PARAM_FIELDS && k.as_str() != PARAM_ORDER
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    ListParams {
        page,
        page_size,
        fields: params.get(PARAM_FIELDS).cloned().unwrap_or_default(),
        order: params.get(PARAM_ORDER).cloned().unwrap_or_default(),
        filters,
    }
}

pub async fn list(
    State(state): State<AppState>,
    Path((db_alias, table_alias)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let (adapter, _, table) = state.route(&db_alias, &table_alias)?;
    let list_params = list_params(&state, &params);
    let (rows, adapter_total) = adapter.list(table, &list_params).await?;

    let total = if list_params.is_filtered() {
        adapter_total
    } else {
        state.counts.get(&db_alias, &table_alias).unwrap_or(adapter_total)
    };
    let mut data = Value::Array(rows.into_iter().map(Value::Object).collect());
    normalize_pk_values(&mut data, &table.primary_key);
    Ok(Json(json!({ "total": total, "data": data })))
}

pub async fn batch_create(
    State(state): State<AppState>,
    Path((db_alias, table_alias)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let (adapter, _, table) = state.route(&db_alias, &table_alias)?;
    let mut records = body_to_records(body)?;
    if records.is_empty() {
        return Err(AppError::BadRequest("No records to create".into()));
    }
    for record in &mut records {
        apply_default_values(record, table)?;
    }
    let (inserted_ids, mut records) = adapter.batch_create(table, records).await?;
    if !inserted_ids.is_empty() && inserted_ids.len() == records.len() && !table.primary_key.is_empty() {
        for (record, id) in records.iter_mut().zip(inserted_ids) {
            record.insert(table.primary_key.clone(), id);
        }
    }
    let mut data = Value::Array(records.into_iter().map(Value::Object).collect());
    normalize_pk_values(&mut data, &table.primary_key);
    Ok((StatusCode::CREATED, Json(data)))
}

pub async fn batch_update(
    State(state): State<AppState>,
    Path((db_alias, table_alias)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let (adapter, _, table) = state.route(&db_alias, &table_alias)?;
    if table.primary_key.is_empty() {
        return Err(AppError::BadRequest(
            "Primary key not defined for table, batch update requires primary key.".into(),
        ));
    }
    let mut records = body_to_records(body)?;
    if records.is_empty() {
        return Err(AppError::BadRequest("No records to update".into()));
    }
    for record in &mut records {
        apply_auto_update_fields(record, table);
    }
    let (matched, modified) = adapter.batch_update(table, records).await?;
    Ok(Json(json!({
        "message": "Batch update successful",
        "matched_count": matched,
        "modified_count": modified
    })))
}

pub async fn batch_delete(
    State(state): State<AppState>,
    Path((db_alias, table_alias)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let (adapter, _, table) = state.route(&db_alias, &table_alias)?;
    if table.primary_key.is_empty() {
        return Err(AppError::BadRequest(
            "Primary key not defined for table, batch delete requires primary key.".into(),
        ));
    }
    let ids = batch_delete_ids(&body, &table.primary_key)?;
    let deleted = adapter.batch_delete(table, ids).await?;
    Ok(Json(json!({ "message": "Batch delete successful", "deleted_count": deleted })))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path((db_alias, table_alias, id)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let (adapter, _, table) = state.route(&db_alias, &table_alias)?;
    let filter = id_filter(table, &id, params.get(PARAM_KEY).map(String::as_str).unwrap_or(""))?;
    let fields = params.get(PARAM_FIELDS).cloned().unwrap_or_default();
    let record = adapter.get_one(table, &filter, &fields).await?;
    let mut value = Value::Object(record);
    normalize_pk_values(&mut value, &table.primary_key);
    Ok(Json(value))
}

pub async fn update_one(
    State(state): State<AppState>,
    Path((db_alias, table_alias, id)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let (adapter, _, table) = state.route(&db_alias, &table_alias)?;
    let filter = id_filter(table, &id, params.get(PARAM_KEY).map(String::as_str).unwrap_or(""))?;
    let Value::Object(mut data) = body else {
        return Err(AppError::BadRequest("Invalid JSON payload: expected an object".into()));
    };
    apply_auto_update_fields(&mut data, table);
    // the client may not re-assert the lookup key in the update body
    for key in filter.keys() {
        data.remove(key);
    }
    if data.is_empty() {
        return Err(AppError::BadRequest("No fields to update in payload".into()));
    }
    let (matched, modified) = adapter.update_one(table, &filter, data).await?;
    Ok(Json(json!({
        "message": "Update successful",
        "matched_count": matched,
        "modified_count": modified
    })))
}

pub async fn delete_one(
    State(state): State<AppState>,
    Path((db_alias, table_alias, id)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let (adapter, _, table) = state.route(&db_alias, &table_alias)?;
    let filter = id_filter(table, &id, params.get(PARAM_KEY).map(String::as_str).unwrap_or(""))?;
    let deleted = adapter.delete_one(table, &filter).await?;
    Ok(Json(json!({ "message": "Delete successful", "deleted_count": deleted })))
}

/// Serve the generated OpenAPI document for one database.
pub async fn swagger_yaml(
    State(state): State<AppState>,
    Path(db_alias): Path<String>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let db = state
        .config
        .databases
        .get(&db_alias)
        .ok_or_else(|| AppError::NotFound(format!("database {} not found", db_alias)))?;
    let path = state.cfg_dir.join("table").join(&db.database).join("swagger.yaml");
    let text = std::fs::read_to_string(&path)
        .map_err(|_| AppError::NotFound(format!("swagger.yaml not found for db: {}", db_alias)))?;
    Ok(([(axum::http::header::CONTENT_TYPE, "application/yaml")], text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultValue;

    fn table_with_defaults() -> TableConfig {
        let mut tc = TableConfig {
            name: "user".into(),
            alias: "user".into(),
            primary_key: "id".into(),
            unique_keys: vec![vec!["email".into()], vec!["tenant".into(), "name".into()]],
            auto_update_fields: vec!["updated_at".into()],
            ..TableConfig::default()
        };
        tc.default_values.insert("status".into(), DefaultValue::Literal(json!(1)));
        tc.default_values.insert("created_at".into(), DefaultValue::Now);
        tc
    }

    #[test]
    fn defaults_fill_absent_null_and_empty() {
        let table = table_with_defaults();
        let mut rec = Record::new();
        rec.insert("created_at".into(), Value::String("".into()));
        apply_default_values(&mut rec, &table).unwrap();
        assert_eq!(rec["status"], json!(1));
        assert!(rec["created_at"].as_str().map(|s| !s.is_empty()).unwrap_or(false));
    }

    #[test]
    fn defaults_are_idempotent() {
        let table = table_with_defaults();
        let mut rec = Record::new();
        rec.insert("status".into(), json!(5));
        apply_default_values(&mut rec, &table).unwrap();
        let once = rec.clone();
        let created = once["created_at"].clone();
        apply_default_values(&mut rec, &table).unwrap();
        assert_eq!(rec["status"], json!(5));
        assert_eq!(rec["created_at"], created);
    }

    #[test]
    fn pk_normalization_recurses() {
        let mut v = json!({
            "id": 9007199254740993i64,
            "child": { "id": 1, "name": "x" },
            "items": [ { "id": 2.0 } ]
        });
        normalize_pk_values(&mut v, "id");
        assert_eq!(v["id"], json!("9007199254740993"));
        assert_eq!(v["child"]["id"], json!("1"));
        assert_eq!(v["items"][0]["id"], json!("2"));
        assert_eq!(v["child"]["name"], json!("x"));
    }

    #[test]
    fn batch_delete_accepts_ids_or_objects() {
        let ids = batch_delete_ids(&json!([1, 2, 3]), "id").unwrap();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
        let ids = batch_delete_ids(&json!([{"id": 4}, {"id": 5}]), "id").unwrap();
        assert_eq!(ids, vec![json!(4), json!(5)]);
        assert!(batch_delete_ids(&json!([]), "id").is_err());
        assert!(batch_delete_ids(&json!([{"name": "x"}]), "id").is_err());
        assert!(batch_delete_ids(&json!({"id": 1}), "id").is_err());
    }

    #[test]
    fn composite_key_filter_validation() {
        let table = table_with_defaults();
        let filter = id_filter(&table, "b@x", "email").unwrap();
        assert_eq!(filter["email"], json!("b@x"));

        let filter = id_filter(&table, "acme,bob", "tenant,name").unwrap();
        assert_eq!(filter["tenant"], json!("acme"));
        assert_eq!(filter["name"], json!("bob"));

        assert!(id_filter(&table, "x", "name").is_err());
        assert!(id_filter(&table, "only-one", "tenant,name").is_err());

        let filter = id_filter(&table, "42", "").unwrap();
        assert_eq!(filter["id"], json!(42));
    }

    #[test]
    fn auto_update_stamps_fields() {
        let table = table_with_defaults();
        let mut rec = Record::new();
        rec.insert("email".into(), json!("a@x"));
        apply_auto_update_fields(&mut rec, &table);
        assert!(rec.contains_key("updated_at"));
    }
}
