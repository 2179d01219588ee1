//! Config materialization: write one `<table>.enable.yaml` per introspected
//! table and one `swagger.yaml` per database. An `alias` already present in
//! an existing table file survives regeneration, so URL names stay stable
//! across restarts.

use crate::config::{list_disabled_tables, list_enabled_databases, SoftDeleteType};
use crate::error::ConfigError;
use crate::meta::{extract_tables, swagger, TableMeta};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

fn str_is_empty(s: &&str) -> bool {
    s.is_empty()
}

#[derive(Serialize)]
struct TableFile<'a> {
    name: &'a str,
    alias: &'a str,
    #[serde(skip_serializing_if = "str_is_empty")]
    primary_key: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unique_keys: &'a Vec<Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    default_values: &'a BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "str_is_empty")]
    softdel_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    softdel_type: &'a Option<SoftDeleteType>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    auto_update: &'a BTreeMap<String, Value>,
}

pub fn table_yaml(table: &TableMeta) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(&TableFile {
        name: &table.name,
        alias: &table.alias,
        primary_key: &table.primary_key,
        unique_keys: &table.unique_keys,
        default_values: &table.default_values,
        softdel_key: &table.softdel_key,
        softdel_type: &table.softdel_type,
        auto_update: &table.auto_update,
    })?)
}

fn alias_from_yaml(path: &Path) -> String {
    let Ok(text) = std::fs::read_to_string(path) else {
        return String::new();
    };
    serde_yaml::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.get("alias").and_then(|a| a.as_str()).map(|s| s.to_string()))
        .unwrap_or_default()
}

/// Write the per-table files, preserving aliases from an earlier run; the
/// disabled set is skipped entirely.
pub fn write_table_configs(
    table_dir: &Path,
    tables: &mut [TableMeta],
    disabled: &std::collections::HashSet<String>,
) -> Result<(), ConfigError> {
    std::fs::create_dir_all(table_dir)?;
    for table in tables.iter_mut() {
        if disabled.contains(&table.name) {
            continue;
        }
        let file = table_dir.join(format!("{}.enable.yaml", table.name));
        let old_alias = alias_from_yaml(&file);
        if !old_alias.is_empty() {
            table.alias = old_alias;
        }
        match table_yaml(table) {
            Ok(yaml) => std::fs::write(&file, yaml)?,
            Err(e) => {
                tracing::warn!(table = %table.name, error = %e, "table config not written");
            }
        }
    }
    Ok(())
}

pub fn write_swagger(
    table_dir: &Path,
    tables: &[TableMeta],
    disabled: &std::collections::HashSet<String>,
    db_alias: &str,
    api_prefix: &str,
) -> Result<(), ConfigError> {
    let enabled: Vec<TableMeta> = tables.iter().filter(|t| !disabled.contains(&t.name)).cloned().collect();
    let yaml = swagger::to_swagger_yaml(&enabled, db_alias, api_prefix)?;
    std::fs::create_dir_all(table_dir)?;
    std::fs::write(table_dir.join("swagger.yaml"), yaml)?;
    Ok(())
}

/// The startup pipeline stage: introspect every enabled database and
/// regenerate its table configs and OpenAPI document. A database that fails
/// is logged and skipped, the rest still materialize.
pub async fn materialize(cfg_dir: &Path, api_prefix: &str) -> Result<(), ConfigError> {
    for db in list_enabled_databases(cfg_dir)? {
        let table_dir = cfg_dir.join("table").join(&db.database);
        let disabled = list_disabled_tables(&table_dir);
        let mut tables = match extract_tables(&db).await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(database = %db.database, error = %e, "introspection failed, skipping database");
                continue;
            }
        };
        write_table_configs(&table_dir, &mut tables, &disabled)?;
        write_swagger(&table_dir, &tables, &disabled, &db.alias, api_prefix)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn sample_table() -> TableMeta {
        let mut t = TableMeta {
            name: "user".into(),
            alias: "user".into(),
            primary_key: "id".into(),
            unique_keys: vec![vec!["email".into()]],
            softdel_key: "deleted_at".into(),
            softdel_type: Some(SoftDeleteType::Timestamp),
            ..TableMeta::default()
        };
        t.default_values.insert("id".into(), json!("{{snowflake}}"));
        t.auto_update.insert("updated_at".into(), json!("{{now}}"));
        t
    }

    #[test]
    fn table_yaml_roundtrips_into_config() {
        let yaml = table_yaml(&sample_table()).unwrap();
        let tc: crate::config::TableConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(tc.name, "user");
        assert_eq!(tc.primary_key, "id");
        assert_eq!(tc.unique_keys, vec![vec!["email".to_string()]]);
        assert_eq!(tc.softdel_type, Some(SoftDeleteType::Timestamp));
        assert_eq!(tc.auto_update_fields, vec!["updated_at".to_string()]);
        assert_eq!(
            tc.default_values["id"],
            crate::config::DefaultValue::Snowflake
        );
    }

    #[test]
    fn existing_alias_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let table_dir = dir.path();
        std::fs::write(
            table_dir.join("user.enable.yaml"),
            "name: user\nalias: people\n",
        )
        .unwrap();
        let mut tables = vec![sample_table()];
        write_table_configs(table_dir, &mut tables, &HashSet::new()).unwrap();
        assert_eq!(tables[0].alias, "people");
        let written = std::fs::read_to_string(table_dir.join("user.enable.yaml")).unwrap();
        assert!(written.contains("alias: people"));
    }

    #[test]
    fn disabled_tables_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = vec![sample_table()];
        let disabled: HashSet<String> = ["user".to_string()].into();
        write_table_configs(dir.path(), &mut tables, &disabled).unwrap();
        assert!(!dir.path().join("user.enable.yaml").exists());

        write_swagger(dir.path(), &tables, &disabled, "test", "/api/rest").unwrap();
        let swagger = std::fs::read_to_string(dir.path().join("swagger.yaml")).unwrap();
        assert!(!swagger.contains("/api/rest/test/user"));
    }
}
