//! Swagger → GraphQL projection: each schema becomes an object type and an
//! input type (readOnly fields excluded), each path+verb a query or
//! mutation whose resolver proxies to the REST surface.

use crate::error::ConfigError;
use crate::graphql::resolvers;
use async_graphql::dynamic::{Field, FieldFuture, FieldValue, InputObject, InputValue, Object, Schema, TypeRef};
use serde_json::Value;
use std::collections::BTreeMap;

/// `user_batch_update` → `userBatchUpdateInput`.
pub fn input_type_name(name: &str) -> String {
    let mut joined: String = name
        .split('_')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();
    joined.push_str("Input");
    let mut chars = joined.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => joined,
    }
}

pub fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The table alias is the last path segment that is not an id placeholder or
/// a batch suffix.
pub fn base_name_from_path(path: &str) -> String {
    path.rsplit('/')
        .find(|s| !s.is_empty() && *s != "{id}" && !s.starts_with("batch"))
        .unwrap_or("")
        .to_string()
}

/// GraphQL scalar for a swagger property; ids are always strings.
pub fn scalar_type(prop: &Value, field_name: &str) -> TypeRef {
    if field_name == "id" || field_name == "_id" {
        return TypeRef::named(TypeRef::STRING);
    }
    match prop.get("type").and_then(|t| t.as_str()) {
        Some("integer") => TypeRef::named(TypeRef::INT),
        Some("number") => TypeRef::named(TypeRef::FLOAT),
        Some("boolean") => TypeRef::named(TypeRef::BOOLEAN),
        Some("array") => {
            let item = prop
                .get("items")
                .and_then(|i| i.get("type"))
                .and_then(|t| t.as_str())
                .unwrap_or("string");
            match item {
                "integer" => TypeRef::named_list(TypeRef::INT),
                "number" => TypeRef::named_list(TypeRef::FLOAT),
                "boolean" => TypeRef::named_list(TypeRef::BOOLEAN),
                _ => TypeRef::named_list(TypeRef::STRING),
            }
        }
        _ => TypeRef::named(TypeRef::STRING),
    }
}

/// A field whose resolver reads its own name out of the parent JSON object.
fn json_field(name: &str, type_ref: TypeRef) -> Field {
    let key = name.to_string();
    Field::new(name, type_ref, move |ctx| {
        let key = key.clone();
        FieldFuture::new(async move {
            if let Some(async_graphql::Value::Object(map)) = ctx.parent_value.as_value() {
                if let Some(v) = map.get(key.as_str()) {
                    if *v != async_graphql::Value::Null {
                        return Ok(Some(FieldValue::value(v.clone())));
                    }
                }
            }
            Ok(None)
        })
    })
}

struct SwaggerSchema {
    properties: BTreeMap<String, Value>,
    required: Vec<String>,
}

fn parse_schemas(doc: &Value) -> BTreeMap<String, SwaggerSchema> {
    let mut out = BTreeMap::new();
    let Some(schemas) = doc
        .get("components")
        .and_then(|c| c.get("schemas"))
        .and_then(|s| s.as_object())
    else {
        return out;
    };
    for (name, schema) in schemas {
        let properties = schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let required = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        out.insert(name.clone(), SwaggerSchema { properties, required });
    }
    out
}

/// Build the executable schema for one database from its generated swagger
/// document. Resolvers call back into `rest_base_url`.
pub fn schema_from_swagger(swagger_yaml: &str, rest_base_url: &str) -> Result<Schema, ConfigError> {
    let doc: Value = serde_yaml::from_str(swagger_yaml)?;
    let schemas = parse_schemas(&doc);

    let mut objects: Vec<Object> = Vec::new();
    let mut inputs: Vec<InputObject> = Vec::new();
    let mut batch_update_pks: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (name, schema) in &schemas {
        let mut object = Object::new(name.clone());
        let mut input = InputObject::new(input_type_name(name));
        for (fname, prop) in &schema.properties {
            object = object.field(json_field(fname, scalar_type(prop, fname)));
            let read_only = prop.get("readOnly").and_then(|v| v.as_bool()).unwrap_or(false);
            if !read_only {
                input = input.field(InputValue::new(fname.clone(), scalar_type(prop, fname)));
            }
        }
        objects.push(object);
        inputs.push(input);
        if name.contains("batch_update") && !schema.required.is_empty() {
            batch_update_pks.insert(name.clone(), schema.required.clone());
        }
    }

    let mut query = Object::new("Query");
    let mut mutation = Object::new("Mutation");
    let mut has_query = false;
    let mut has_mutation = false;

    let paths = doc.get("paths").and_then(|p| p.as_object()).cloned().unwrap_or_default();
    for (path, methods) in &paths {
        let Some(methods) = methods.as_object() else { continue };
        let base = base_name_from_path(path);
        if base.is_empty() || !schemas.contains_key(&base) {
            continue;
        }
        let rest_url = format!("{}{}", rest_base_url, path);
        let input_name = input_type_name(&base);
        for method in methods.keys() {
            match method.as_str() {
                "get" => {
                    if path.contains("{id}") {
                        query = query.field(resolvers::get_by_id(&base, &base, rest_url.clone()));
                        has_query = true;
                    } else {
                        let result_name = format!("{}ListResult", base);
                        let result = Object::new(result_name.clone())
                            .field(json_field("data", TypeRef::named_list(base.clone())))
                            .field(json_field("total", TypeRef::named(TypeRef::INT)));
                        objects.push(result);
                        query = query.field(resolvers::list(&format!("{}List", base), &result_name, rest_url.clone()));
                        has_query = true;
                    }
                }
                "post" => {
                    if path.ends_with("batch_delete") {
                        mutation = mutation
                            .field(resolvers::batch_delete(&format!("batchDelete{}", upper_first(&base)), rest_url.clone()));
                    } else {
                        mutation = mutation.field(resolvers::batch_create(
                            &format!("batchCreate{}", upper_first(&base)),
                            &base,
                            &input_name,
                            rest_url.clone(),
                        ));
                    }
                    has_mutation = true;
                }
                "put" => {
                    if path.contains("{id}") {
                        mutation = mutation.field(resolvers::update_by_id(
                            &format!("update{}", upper_first(&base)),
                            &base,
                            &input_name,
                            rest_url.clone(),
                        ));
                    } else {
                        let batch_schema_name = format!("{}_batch_update", base);
                        let batch_input = if schemas.contains_key(&batch_schema_name) {
                            input_type_name(&batch_schema_name)
                        } else {
                            input_name.clone()
                        };
                        let pk_fields = batch_update_pks.get(&batch_schema_name).cloned().unwrap_or_default();
                        mutation = mutation.field(resolvers::batch_update(
                            &format!("batchUpdate{}", upper_first(&base)),
                            &base,
                            &batch_input,
                            rest_url.clone(),
                            pk_fields,
                        ));
                    }
                    has_mutation = true;
                }
                "delete" => {
                    if path.contains("{id}") {
                        mutation = mutation
                            .field(resolvers::delete_by_id(&format!("delete{}", upper_first(&base)), rest_url.clone()));
                        has_mutation = true;
                    }
                }
                _ => {}
            }
        }
    }

    if !has_query {
        query = query.field(Field::new("hello", TypeRef::named(TypeRef::STRING), |_| {
            FieldFuture::new(async { Ok(Some(FieldValue::value("world"))) })
        }));
    }

    let mut builder = Schema::build("Query", has_mutation.then_some("Mutation"), None::<&str>);
    for object in objects {
        builder = builder.register(object);
    }
    for input in inputs {
        builder = builder.register(input);
    }
    builder = builder.register(query);
    if has_mutation {
        builder = builder.register(mutation);
    }
    builder
        .finish()
        .map_err(|e| ConfigError::Load(format!("graphql schema build: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_type_naming() {
        assert_eq!(input_type_name("user"), "userInput");
        assert_eq!(input_type_name("user_batch_update"), "userBatchUpdateInput");
        assert_eq!(input_type_name("order_item"), "orderItemInput");
    }

    #[test]
    fn base_name_extraction() {
        assert_eq!(base_name_from_path("/api/rest/test/user"), "user");
        assert_eq!(base_name_from_path("/api/rest/test/user/{id}"), "user");
        assert_eq!(base_name_from_path("/api/rest/test/user/batch_delete"), "user");
    }

    #[test]
    fn id_fields_are_strings() {
        let t = scalar_type(&serde_json::json!({"type": "integer"}), "id");
        assert_eq!(t.to_string(), "String");
        let t = scalar_type(&serde_json::json!({"type": "integer"}), "age");
        assert_eq!(t.to_string(), "Int");
        let t = scalar_type(&serde_json::json!({"type": "number"}), "score");
        assert_eq!(t.to_string(), "Float");
    }

    #[test]
    fn schema_builds_from_generated_swagger() {
        let table = crate::meta::TableMeta {
            name: "user".into(),
            alias: "user".into(),
            primary_key: "id".into(),
            fields: vec![
                crate::meta::FieldMeta {
                    name: "id".into(),
                    ty: "bigint".into(),
                    is_primary: true,
                    auto_inc: true,
                    ..crate::meta::FieldMeta::default()
                },
                crate::meta::FieldMeta {
                    name: "email".into(),
                    ty: "varchar(64)".into(),
                    ..crate::meta::FieldMeta::default()
                },
                crate::meta::FieldMeta {
                    name: "age".into(),
                    ty: "int".into(),
                    nullable: true,
                    ..crate::meta::FieldMeta::default()
                },
            ],
            ..crate::meta::TableMeta::default()
        };
        let yaml = crate::meta::swagger::to_swagger_yaml(&[table], "test", "/api/rest").unwrap();
        let schema = schema_from_swagger(&yaml, "http://localhost:8080").unwrap();
        let sdl = schema.sdl();
        assert!(sdl.contains("type user"));
        assert!(sdl.contains("userList"));
        assert!(sdl.contains("batchCreateUser"));
        assert!(sdl.contains("batchUpdateUser"));
        assert!(sdl.contains("batchDeleteUser"));
        assert!(sdl.contains("deleteUser"));
        assert!(sdl.contains("updateUser"));
        assert!(sdl.contains("userListResult"));
        // readOnly id is excluded from the create input but present in the
        // batch-update input
        assert!(sdl.contains("input userInput"));
        assert!(sdl.contains("input userBatchUpdateInput"));
    }
}
