//! OpenAPI document generation: one `swagger.yaml` per database describing
//! the schemas and CRUD paths the REST engine serves.

use crate::error::ConfigError;
use crate::meta::heuristics::{
    is_auto_update_field, is_id_readonly_field, is_response_readonly_field, is_soft_delete_field, to_swagger_type,
};
use crate::meta::{FieldMeta, TableMeta};
use serde_json::{json, Map, Value};

const FILTER_DOC: &str = "List requests accept extended operators by appending a double underscore to the field name:\n\n\
- field=x: equality (default)\n\
- field__ne=x: not equal\n\
- field__gt=x / field__gte=x / field__lt=x / field__lte=x: comparisons\n\
- field__like=x%25: pattern match (URL-encode % as %25)\n\
- field__icontains=x: case-insensitive contains\n\
- field__in=a,b,c: membership\n\
- field__isnull=true|false: null check\n\
- field__between=a,b: inclusive range\n\n\
Paging and shaping: page=1, page_size=10, order=field or order=-field, fields=a,b,c.";

fn sanitize(s: &str) -> String {
    s.replace('\n', " ").replace('"', "'")
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Object properties plus the `required` list. A field is readOnly when the
/// backend or the name heuristics say clients cannot write it; it is
/// required when nothing (nullability, default, auto-increment, readonly)
/// would fill it.
pub fn schema_fields(fields: &[FieldMeta]) -> (Map<String, Value>, Vec<String>) {
    let mut props = Map::new();
    let mut required = Vec::new();
    for f in fields {
        let mut prop = Map::new();
        prop.insert("type".into(), json!(to_swagger_type(&f.ty)));
        if !f.comment.is_empty() {
            prop.insert("description".into(), json!(sanitize(&f.comment)));
        }
        let read_only = f.auto_inc
            || f.on_update
            || is_auto_update_field(&f.name)
            || is_soft_delete_field(&f.name)
            || is_response_readonly_field(&f.name)
            || is_id_readonly_field(&f.name);
        if read_only {
            prop.insert("readOnly".into(), json!(true));
        }
        props.insert(f.name.clone(), Value::Object(prop));

        if !f.nullable && !f.has_default && !read_only {
            required.push(f.name.clone());
        }
    }
    (props, required)
}

/// The `<alias>_batch_update` schema: same fields with the primary key
/// writable and required.
fn batch_update_schema(props: &Map<String, Value>, required: &[String], primary_key: &str) -> Value {
    let mut batch_props = Map::new();
    for (name, prop) in props {
        if name == primary_key {
            let mut writable = prop.as_object().cloned().unwrap_or_default();
            writable.remove("readOnly");
            batch_props.insert(name.clone(), Value::Object(writable));
        } else {
            batch_props.insert(name.clone(), prop.clone());
        }
    }
    let mut batch_required: Vec<String> = required.to_vec();
    if !primary_key.is_empty() && !batch_required.iter().any(|r| r == primary_key) {
        batch_required.push(primary_key.to_string());
    }
    json!({ "type": "object", "properties": batch_props, "required": batch_required })
}

fn query_parameters() -> Value {
    json!([
        { "name": "fields", "in": "query", "schema": { "type": "string" }, "description": "projected fields, comma separated" },
        { "name": "order", "in": "query", "schema": { "type": "string" }, "description": "sort field, prefix with - for descending" },
        { "name": "page", "in": "query", "schema": { "type": "integer" }, "description": "page number, from 1" },
        { "name": "page_size", "in": "query", "schema": { "type": "integer" }, "description": "rows per page" }
    ])
}

pub fn to_swagger_yaml(tables: &[TableMeta], db_alias: &str, api_prefix: &str) -> Result<String, ConfigError> {
    let mut schemas = Map::new();
    let mut paths = Map::new();
    let mut tags = Vec::new();

    for t in tables {
        let (props, required) = schema_fields(&t.fields);
        schemas.insert(
            format!("{}_batch_update", t.alias),
            batch_update_schema(&props, &required, &t.primary_key),
        );
        schemas.insert(
            t.alias.clone(),
            json!({ "type": "object", "properties": props, "required": required }),
        );
        let alias = t.alias.as_str();
        tags.push(json!({ "name": alias, "description": sanitize(&t.comment) }));
        let schema_ref_owned = format!("#/components/schemas/{}", alias);
        let batch_ref_owned = format!("#/components/schemas/{}_batch_update", alias);
        let schema_ref = schema_ref_owned.as_str();
        let batch_ref = batch_ref_owned.as_str();
        let base_path = format!("{}/{}/{}", api_prefix, db_alias, alias);

        let id_param = json!({
            "name": "id", "in": "path", "required": true,
            "description": "primary key, or comma-joined values when paired with ?key=",
            "schema": { "type": "string" }
        });
        let fields_param = json!({
            "name": "fields", "in": "query", "schema": { "type": "string" },
            "description": "projected fields, comma separated"
        });
        let key_param = json!({
            "name": "key", "in": "query", "schema": { "type": "string" },
            "description": "unique-key field names matching the path value"
        });

        paths.insert(
            base_path.clone(),
            json!({
                "get": {
                    "tags": [alias], "summary": format!("List {} records", alias),
                    "description": "Supports equality, pattern, range and membership filters; see the API description.",
                    "parameters": query_parameters(),
                    "responses": { "200": { "description": "OK", "content": { "application/json": { "schema": {
                        "type": "object",
                        "properties": {
                            "total": { "type": "integer" },
                            "data": { "type": "array", "items": { "$ref": schema_ref } }
                        }
                    } } } } }
                },
                "post": {
                    "tags": [alias], "summary": format!("Batch create {}", alias),
                    "requestBody": { "required": true, "content": { "application/json": { "schema": {
                        "type": "array", "items": { "$ref": schema_ref }
                    } } } },
                    "responses": { "201": { "description": "Created" } }
                },
                "put": {
                    "tags": [alias], "summary": format!("Batch update {}", alias),
                    "requestBody": { "required": true, "content": { "application/json": { "schema": {
                        "type": "array", "items": { "$ref": batch_ref }
                    } } } },
                    "responses": { "200": { "description": "Updated" } }
                }
            }),
        );
        paths.insert(
            format!("{}/batch_delete", base_path),
            json!({
                "post": {
                    "tags": [alias], "summary": format!("Batch delete {}", alias),
                    "requestBody": { "required": true, "content": { "application/json": { "schema": {
                        "type": "array", "items": { "type": "string" }
                    } } } },
                    "responses": { "200": { "description": "Deleted" } }
                }
            }),
        );
        paths.insert(
            format!("{}/{{id}}", base_path),
            json!({
                "get": {
                    "tags": [alias], "summary": format!("Get {} by id", alias),
                    "parameters": [id_param.clone(), fields_param, key_param],
                    "responses": { "200": { "description": "OK", "content": { "application/json": { "schema": { "$ref": schema_ref } } } } }
                },
                "put": {
                    "tags": [alias], "summary": format!("Update {} by id", alias),
                    "parameters": [id_param.clone()],
                    "requestBody": { "required": true, "content": { "application/json": { "schema": { "$ref": schema_ref } } } },
                    "responses": { "200": { "description": "Updated" } }
                },
                "delete": {
                    "tags": [alias], "summary": format!("Delete {} by id", alias),
                    "parameters": [id_param],
                    "responses": { "200": { "description": "Deleted" } }
                }
            }),
        );
    }

    let document = json!({
        "openapi": "3.0.3",
        "info": {
            "title": format!("{} RESTful API", title_case(db_alias)),
            "version": "1.0.0",
            "description": FILTER_DOC
        },
        "tags": tags,
        "paths": paths,
        "components": { "schemas": schemas }
    });
    Ok(serde_yaml::to_string(&document)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<FieldMeta> {
        vec![
            FieldMeta {
                name: "id".into(),
                ty: "bigint".into(),
                is_primary: true,
                auto_inc: true,
                ..FieldMeta::default()
            },
            FieldMeta {
                name: "email".into(),
                ty: "varchar(64)".into(),
                ..FieldMeta::default()
            },
            FieldMeta {
                name: "age".into(),
                ty: "int".into(),
                has_default: true,
                default: Some(json!(0)),
                ..FieldMeta::default()
            },
            FieldMeta {
                name: "created_at".into(),
                ty: "datetime".into(),
                ..FieldMeta::default()
            },
        ]
    }

    #[test]
    fn readonly_and_required_rules() {
        let (props, required) = schema_fields(&fields());
        assert_eq!(props["id"]["readOnly"], json!(true));
        assert_eq!(props["created_at"]["readOnly"], json!(true));
        assert!(props["email"].get("readOnly").is_none());
        assert_eq!(required, vec!["email".to_string()]);
        assert_eq!(props["age"]["type"], json!("integer"));
    }

    #[test]
    fn batch_update_requires_writable_pk() {
        let (props, required) = schema_fields(&fields());
        let batch = batch_update_schema(&props, &required, "id");
        assert!(batch["properties"]["id"].get("readOnly").is_none());
        let req: Vec<String> = batch["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(req.contains(&"id".to_string()));
        assert!(req.contains(&"email".to_string()));
    }

    #[test]
    fn document_contains_paths_and_schemas() {
        let table = TableMeta {
            name: "user".into(),
            alias: "user".into(),
            primary_key: "id".into(),
            fields: fields(),
            ..TableMeta::default()
        };
        let yaml = to_swagger_yaml(&[table], "test", "/api/rest").unwrap();
        let doc: Value = serde_yaml::from_str(&yaml).unwrap();
        assert!(doc["components"]["schemas"].get("user").is_some());
        assert!(doc["components"]["schemas"].get("user_batch_update").is_some());
        assert!(doc["paths"].get("/api/rest/test/user").is_some());
        assert!(doc["paths"].get("/api/rest/test/user/{id}").is_some());
        assert!(doc["paths"].get("/api/rest/test/user/batch_delete").is_some());
        assert_eq!(doc["info"]["title"], json!("Test RESTful API"));
    }

    #[test]
    fn comments_are_sanitized() {
        assert_eq!(sanitize("a\nb\"c\""), "a b'c'");
    }
}
