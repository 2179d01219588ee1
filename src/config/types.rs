//! Config types matching the YAML layout (`_base.yaml` + per-database and
//! per-table files).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbKind {
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgres,
    #[serde(rename = "sqlite")]
    Sqlite,
    #[serde(rename = "sqlserver")]
    SqlServer,
    #[serde(rename = "clickhouse")]
    ClickHouse,
    #[serde(rename = "mongodb")]
    MongoDb,
}

impl DbKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbKind::MySql => "mysql",
            DbKind::Postgres => "postgresql",
            DbKind::Sqlite => "sqlite",
            DbKind::SqlServer => "sqlserver",
            DbKind::ClickHouse => "clickhouse",
            DbKind::MongoDb => "mongodb",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub max_open_conns: u32,
    #[serde(default)]
    pub max_idle_conns: u32,
    /// Seconds; 0 means driver default.
    #[serde(default)]
    pub max_life_time: u64,
    #[serde(default)]
    pub max_idle_time: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbLogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Queries slower than this many milliseconds are logged at warn.
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_slow_threshold_ms() -> u64 {
    1000
}

impl Default for DbLogConfig {
    fn default() -> Self {
        DbLogConfig {
            level: default_log_level(),
            slow_threshold_ms: default_slow_threshold_ms(),
        }
    }
}

/// `_base.yaml`: global knobs shared by every database.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BaseConfig {
    #[serde(default = "default_page")]
    pub default_page: i64,
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
    #[serde(default = "default_snowflake_node")]
    pub snowflake_node_id: i64,
    /// Seconds between total-count refreshes; 0 disables the refresher.
    #[serde(default = "default_total_cnt_interval")]
    pub total_cnt_interval: u64,
    #[serde(default)]
    pub db_log: DbLogConfig,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    10
}

fn default_max_page_size() -> i64 {
    1000
}

fn default_snowflake_node() -> i64 {
    1
}

fn default_total_cnt_interval() -> u64 {
    30
}

impl Default for BaseConfig {
    fn default() -> Self {
        BaseConfig {
            default_page: default_page(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            snowflake_node_id: default_snowflake_node(),
            total_cnt_interval: default_total_cnt_interval(),
            db_log: DbLogConfig::default(),
        }
    }
}

/// `database/<name>.enable.yaml`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub kind: DbKind,
    pub dsn: String,
    pub database: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(skip)]
    pub tables: Vec<TableConfig>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoftDeleteType {
    Timestamp,
    Boolean,
    Int,
}

/// A configured default: either a literal echoed as-is, or a template
/// generating a fresh value at write time.
#[derive(Clone, Debug, PartialEq)]
pub enum DefaultValue {
    Now,
    Snowflake,
    Ulid,
    UuidV4,
    UuidV7,
    Literal(Value),
}

impl DefaultValue {
    pub fn from_value(v: Value) -> Self {
        if let Value::String(s) = &v {
            match s.as_str() {
                "{{now}}" => return DefaultValue::Now,
                "{{snowflake}}" => return DefaultValue::Snowflake,
                "{{ulid}}" => return DefaultValue::Ulid,
                "{{uuidv4}}" => return DefaultValue::UuidV4,
                "{{uuidv7}}" => return DefaultValue::UuidV7,
                _ => {}
            }
        }
        DefaultValue::Literal(v)
    }
}

impl Serialize for DefaultValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DefaultValue::Now => serializer.serialize_str("{{now}}"),
            DefaultValue::Snowflake => serializer.serialize_str("{{snowflake}}"),
            DefaultValue::Ulid => serializer.serialize_str("{{ulid}}"),
            DefaultValue::UuidV4 => serializer.serialize_str("{{uuidv4}}"),
            DefaultValue::UuidV7 => serializer.serialize_str("{{uuidv7}}"),
            DefaultValue::Literal(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DefaultValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(DefaultValue::from_value(Value::deserialize(deserializer)?))
    }
}

/// `table/<db>/<table>.enable.yaml`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub primary_key: String,
    #[serde(default, deserialize_with = "de_unique_keys")]
    pub unique_keys: Vec<Vec<String>>,
    #[serde(default)]
    pub default_values: HashMap<String, DefaultValue>,
    #[serde(default)]
    pub softdel_key: String,
    #[serde(default)]
    pub softdel_type: Option<SoftDeleteType>,
    #[serde(default, rename = "auto_update", deserialize_with = "de_auto_update")]
    pub auto_update_fields: Vec<String>,
}

impl TableConfig {
    /// The `?key=a,b` combination is accepted only if it equals one of the
    /// configured unique-key groups, order included.
    pub fn is_valid_key_combination(&self, fields: &[String]) -> bool {
        self.unique_keys
            .iter()
            .any(|group| group.len() == fields.len() && group.iter().zip(fields).all(|(a, b)| a == b))
    }
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accepts `[[a, b], c]` shapes: a bare string entry is a single-field group.
fn de_unique_keys<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<String>>, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    let mut out = Vec::new();
    match raw {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Array(group) => {
                        out.push(group.iter().map(scalar_to_string).collect());
                    }
                    other => out.push(vec![scalar_to_string(&other)]),
                }
            }
        }
        Value::Null => {}
        other => return Err(serde::de::Error::custom(format!("unique_keys must be a list, got {}", other))),
    }
    Ok(out)
}

/// Accepts a list of field names or a `{field: template}` mapping.
fn de_auto_update<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::Array(items) => items.iter().map(scalar_to_string).collect(),
        Value::Object(map) => {
            let mut keys: Vec<String> = map.keys().cloned().collect();
            keys.sort();
            keys
        }
        Value::Null => Vec::new(),
        other => vec![scalar_to_string(&other)],
    })
}

/// Everything the gateway needs at runtime, keyed by database alias.
#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    pub base: BaseConfig,
    pub databases: HashMap<String, DatabaseConfig>,
}

impl GatewayConfig {
    pub fn table<'a>(&'a self, db_alias: &str, table_alias: &str) -> Option<(&'a DatabaseConfig, &'a TableConfig)> {
        let db = self.databases.get(db_alias)?;
        let table = db.tables.iter().find(|t| t.alias == table_alias)?;
        Some((db, table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_yaml_parses_with_templates() {
        let yaml = r#"
name: user
alias: user
primary_key: id
unique_keys:
  - [email]
  - [tenant_id, username]
default_values:
  id: "{{snowflake}}"
  created_at: "{{now}}"
  status: 0
softdel_key: deleted_at
softdel_type: timestamp
auto_update:
  updated_at: "{{now}}"
"#;
        let tc: TableConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(tc.primary_key, "id");
        assert_eq!(tc.unique_keys, vec![vec!["email".to_string()], vec!["tenant_id".into(), "username".into()]]);
        assert_eq!(tc.default_values["id"], DefaultValue::Snowflake);
        assert_eq!(tc.default_values["created_at"], DefaultValue::Now);
        assert_eq!(tc.default_values["status"], DefaultValue::Literal(Value::from(0)));
        assert_eq!(tc.softdel_type, Some(SoftDeleteType::Timestamp));
        assert_eq!(tc.auto_update_fields, vec!["updated_at".to_string()]);
    }

    #[test]
    fn unique_keys_accept_bare_strings() {
        let yaml = "name: t\nunique_keys:\n  - email\n  - [a, b]\n";
        let tc: TableConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(tc.unique_keys, vec![vec!["email".to_string()], vec!["a".into(), "b".into()]]);
    }

    #[test]
    fn key_combination_is_order_sensitive() {
        let tc = TableConfig {
            unique_keys: vec![vec!["a".into(), "b".into()]],
            ..TableConfig::default()
        };
        assert!(tc.is_valid_key_combination(&["a".into(), "b".into()]));
        assert!(!tc.is_valid_key_combination(&["b".into(), "a".into()]));
        assert!(!tc.is_valid_key_combination(&["a".into()]));
    }

    #[test]
    fn base_config_defaults() {
        let base: BaseConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(base.default_page, 1);
        assert_eq!(base.default_page_size, 10);
        assert_eq!(base.max_page_size, 1000);
        assert_eq!(base.total_cnt_interval, 30);
    }

    #[test]
    fn db_kind_aliases() {
        let k: DbKind = serde_yaml::from_str("postgres").unwrap();
        assert_eq!(k, DbKind::Postgres);
        let k: DbKind = serde_yaml::from_str("mongodb").unwrap();
        assert_eq!(k, DbKind::MongoDb);
    }
}
