//! Field-name and type heuristics applied after raw catalog extraction:
//! soft-delete / auto-update / readonly detection, default-value
//! materialization, and the OpenAPI type mapping.

use crate::meta::FieldMeta;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const SOFT_DELETE_NAMES: &[&str] = &[
    "is_delete", "is_deleted", "is_remove", "is_removed", "is_obsolete", "is_obsoleted",
    "delete_at", "deleted_at", "delete_time", "deleted_time",
    "remove_at", "removed_at", "remove_time", "removed_time",
    "obsolete_at", "obsoleted_at", "obsolete_time", "obsoleted_time",
    "delete_flag", "deleted_flag", "remove_flag", "removed_flag",
    "obsolete_flag", "obsoleted_flag", "gmt_delete", "gmt_deleted",
];

const AUTO_UPDATE_NAMES: &[&str] = &[
    "update_at", "updated_at", "update_time", "updated_time",
    "modify_at", "modified_at", "modify_time", "modified_time",
    "last_update", "last_updated", "last_modify", "last_modified",
    "login_time", "last_login", "checked_at", "gmt_update", "gmt_updated",
];

const RESPONSE_READONLY_NAMES: &[&str] = &[
    "joined_time", "joined_at", "join_time", "join_at",
    "created_time", "created_at", "create_time", "create_at",
    "updated_time", "updated_at", "update_time", "update_at",
    "login_time", "login_at", "last_login", "gmt_create", "gmt_created",
];

pub fn is_soft_delete_field(name: &str) -> bool {
    let n = name.to_lowercase();
    SOFT_DELETE_NAMES.contains(&n.as_str())
}

pub fn is_auto_update_field(name: &str) -> bool {
    let n = name.to_lowercase();
    AUTO_UPDATE_NAMES.contains(&n.as_str())
}

pub fn is_response_readonly_field(name: &str) -> bool {
    let n = name.to_lowercase();
    RESPONSE_READONLY_NAMES.contains(&n.as_str())
}

pub fn is_id_readonly_field(name: &str) -> bool {
    let n = name.to_lowercase();
    n == "id" || n == "_id"
}

pub fn is_string_type(typ: &str) -> bool {
    let t = typ.to_lowercase();
    ["char", "text", "json", "enum", "varchar"].iter().any(|k| t.contains(k))
}

pub fn is_int_type(typ: &str) -> bool {
    typ.to_lowercase().contains("int")
}

pub fn is_float_type(typ: &str) -> bool {
    let t = typ.to_lowercase();
    ["float", "double", "decimal", "numeric", "real"].iter().any(|k| t.contains(k))
}

pub fn is_time_type(typ: &str) -> bool {
    let t = typ.to_lowercase();
    ["time", "date", "timestamp"].iter().any(|k| t.contains(k))
}

/// Big-integer columns that get a `{{snowflake}}` primary-key default when
/// the backend supplies neither a default nor auto-increment.
pub fn is_snowflake_bigint_type(typ: &str) -> bool {
    matches!(typ.to_lowercase().as_str(), "bigint" | "bigint unsigned" | "int8" | "int64")
}

pub fn guess_soft_delete_type(typ: &str) -> &'static str {
    let t = typ.to_lowercase();
    if t.contains("int") {
        "int"
    } else if t.contains("bool") {
        "boolean"
    } else if t.contains("time") || t.contains("date") {
        "timestamp"
    } else {
        "int"
    }
}

pub fn to_swagger_type(db_type: &str) -> &'static str {
    let l = db_type.to_lowercase();
    if l.contains("int") {
        "integer"
    } else if ["float", "double", "decimal", "numeric", "real"].iter().any(|k| l.contains(k)) {
        "number"
    } else if l.contains("bool") {
        "boolean"
    } else {
        "string"
    }
}

/// Two-type join in the sampling lattice: integer ⊑ number; anything vs
/// string/object/array collapses to the wider side.
pub fn merge_swagger_type(a: &str, b: &str) -> &'static str {
    let pick = |t: &str| -> &'static str {
        match t {
            "integer" => "integer",
            "number" => "number",
            "boolean" => "boolean",
            "object" => "object",
            "array" => "array",
            _ => "string",
        }
    };
    let (a, b) = (pick(a), pick(b));
    if a == b {
        return a;
    }
    if (a == "integer" && b == "number") || (a == "number" && b == "integer") {
        return "number";
    }
    if a == "string" || b == "string" {
        return "string";
    }
    if a == "object" || b == "object" {
        return "object";
    }
    if a == "array" || b == "array" {
        return "array";
    }
    "string"
}

fn is_now_default(val: &str) -> bool {
    let v = val.trim().trim_matches(|c| c == '(' || c == ')' || c == '\'' || c == '"').to_lowercase();
    matches!(v.as_str(), "current_timestamp" | "now" | "now()" | "getdate" | "getdate()" | "sysdate")
}

/// Parse a raw catalog default into a JSON literal (or `{{now}}` template).
/// Nullable columns keep no default; absent defaults are synthesized from
/// the column type so non-nullable fields always have a creation value.
pub fn convert_default_by_type(raw: &str, typ: &str, nullable: bool) -> Option<Value> {
    if nullable {
        return None;
    }
    if !raw.is_empty() {
        let clean = raw.trim().trim_matches(|c| c == '\'' || c == '"' || c == '(' || c == ')');
        if clean.eq_ignore_ascii_case("null") {
            return None;
        }
        if is_now_default(clean) && is_time_type(typ) {
            return Some(json!("{{now}}"));
        }
        if is_int_type(typ) {
            if let Ok(v) = clean.parse::<i64>() {
                return Some(json!(v));
            }
        }
        if is_float_type(typ) {
            if let Ok(v) = clean.parse::<f64>() {
                return Some(json!(v));
            }
        }
        return Some(json!(clean));
    }
    if is_time_type(typ) {
        Some(json!("{{now}}"))
    } else if is_string_type(typ) {
        Some(json!(""))
    } else if is_int_type(typ) {
        Some(json!(0))
    } else if is_float_type(typ) {
        Some(json!(0.0))
    } else {
        None
    }
}

/// Assemble the table's `default_values` map from its fields. The primary
/// key only keeps a default when it is a big integer without backend help,
/// in which case it becomes `{{snowflake}}`.
pub fn collect_default_values(fields: &[FieldMeta], primary_key: &str) -> BTreeMap<String, Value> {
    let mut defs = BTreeMap::new();
    let mut pk_field: Option<&FieldMeta> = None;
    for f in fields {
        if f.name == primary_key {
            pk_field = Some(f);
        }
        if f.has_default {
            if let Some(val) = &f.default {
                defs.insert(f.name.clone(), val.clone());
            }
            continue;
        }
        if f.on_update || is_auto_update_field(&f.name) {
            defs.insert(f.name.clone(), json!("{{now}}"));
            continue;
        }
        if is_soft_delete_field(&f.name) {
            let v = if is_int_type(&f.ty) || is_float_type(&f.ty) {
                json!(0)
            } else if is_string_type(&f.ty) {
                json!("")
            } else {
                json!(0)
            };
            defs.insert(f.name.clone(), v);
            continue;
        }
        if is_response_readonly_field(&f.name) && is_time_type(&f.ty) {
            defs.insert(f.name.clone(), json!("{{now}}"));
        }
    }
    if let Some(pk) = pk_field {
        if !pk.has_default && !pk.auto_inc && is_snowflake_bigint_type(&pk.ty) {
            defs.insert(primary_key.to_string(), json!("{{snowflake}}"));
        } else {
            defs.remove(primary_key);
        }
    }
    defs
}

/// Drop repeated unique-key groups; group identity is the ordered field
/// tuple.
pub fn dedup_unique_keys(keys: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for group in keys {
        if seen.insert(group.join(",")) {
            out.push(group);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, ty: &str) -> FieldMeta {
        FieldMeta {
            name: name.into(),
            ty: ty.into(),
            ..FieldMeta::default()
        }
    }

    #[test]
    fn soft_delete_name_detection() {
        assert!(is_soft_delete_field("deleted_at"));
        assert!(is_soft_delete_field("GMT_DELETE"));
        assert!(!is_soft_delete_field("deleted_by"));
    }

    #[test]
    fn soft_delete_type_inference() {
        assert_eq!(guess_soft_delete_type("tinyint(1)"), "int");
        assert_eq!(guess_soft_delete_type("boolean"), "boolean");
        assert_eq!(guess_soft_delete_type("datetime"), "timestamp");
        assert_eq!(guess_soft_delete_type("varchar(32)"), "int");
    }

    #[test]
    fn now_defaults_normalize() {
        assert_eq!(convert_default_by_type("CURRENT_TIMESTAMP", "datetime", false), Some(json!("{{now}}")));
        assert_eq!(convert_default_by_type("getdate()", "datetime2", false), Some(json!("{{now}}")));
        assert_eq!(convert_default_by_type("now()", "timestamptz", false), Some(json!("{{now}}")));
    }

    #[test]
    fn typed_defaults_parse() {
        assert_eq!(convert_default_by_type("'3'", "int", false), Some(json!(3)));
        assert_eq!(convert_default_by_type("1.5", "decimal(8,2)", false), Some(json!(1.5)));
        assert_eq!(convert_default_by_type("'x'", "varchar(8)", false), Some(json!("x")));
        assert_eq!(convert_default_by_type("NULL", "int", false), None);
        assert_eq!(convert_default_by_type("1", "int", true), None);
    }

    #[test]
    fn absent_defaults_synthesized_by_type() {
        assert_eq!(convert_default_by_type("", "datetime", false), Some(json!("{{now}}")));
        assert_eq!(convert_default_by_type("", "varchar(8)", false), Some(json!("")));
        assert_eq!(convert_default_by_type("", "int", false), Some(json!(0)));
        assert_eq!(convert_default_by_type("", "double", false), Some(json!(0.0)));
        assert_eq!(convert_default_by_type("", "blob", false), None);
    }

    #[test]
    fn snowflake_assigned_to_bare_bigint_pk() {
        let mut pk = field("id", "bigint");
        let fields = vec![pk.clone(), field("name", "varchar(16)")];
        let defs = collect_default_values(&fields, "id");
        assert_eq!(defs.get("id"), Some(&json!("{{snowflake}}")));

        pk.auto_inc = true;
        let defs = collect_default_values(&[pk], "id");
        assert!(!defs.contains_key("id"));
    }

    #[test]
    fn auto_update_and_softdel_defaults() {
        let fields = vec![field("updated_at", "datetime"), field("is_deleted", "tinyint(1)")];
        let defs = collect_default_values(&fields, "");
        assert_eq!(defs["updated_at"], json!("{{now}}"));
        assert_eq!(defs["is_deleted"], json!(0));
    }

    #[test]
    fn type_merge_lattice() {
        assert_eq!(merge_swagger_type("integer", "number"), "number");
        assert_eq!(merge_swagger_type("integer", "string"), "string");
        assert_eq!(merge_swagger_type("boolean", "object"), "object");
        assert_eq!(merge_swagger_type("number", "array"), "array");
        assert_eq!(merge_swagger_type("integer", "integer"), "integer");
    }

    #[test]
    fn unique_key_dedup_is_order_sensitive() {
        let deduped = dedup_unique_keys(vec![
            vec!["a".into(), "b".into()],
            vec!["b".into(), "a".into()],
            vec!["a".into(), "b".into()],
        ]);
        assert_eq!(deduped.len(), 2);
    }
}
