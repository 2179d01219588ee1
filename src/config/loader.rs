//! Load the gateway config tree: `_base.yaml`, enabled database files, and
//! the per-table files the materializer wrote.
//!
//! A file that fails to parse disables its database (or table) only; the
//! rest of the tree still loads.

use crate::config::types::{BaseConfig, DatabaseConfig, GatewayConfig, TableConfig};
use crate::error::ConfigError;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

pub fn enable_file_re() -> Regex {
    Regex::new(r"^(.+)\.enable\.ya?ml$").unwrap()
}

pub fn disable_file_re() -> Regex {
    Regex::new(r"^(.+)\.disable\.ya?ml$").unwrap()
}

pub fn load_config(cfg_dir: &Path) -> Result<GatewayConfig, ConfigError> {
    let base_path = cfg_dir.join("_base.yaml");
    let base: BaseConfig = match std::fs::read_to_string(&base_path) {
        Ok(text) => serde_yaml::from_str(&text)?,
        Err(e) => {
            return Err(ConfigError::Load(format!(
                "read {}: {}",
                base_path.display(),
                e
            )))
        }
    };

    let mut config = GatewayConfig {
        base,
        databases: Default::default(),
    };
    for mut db in list_enabled_databases(cfg_dir)? {
        let table_dir = cfg_dir.join("table").join(&db.database);
        db.tables = load_tables(&table_dir);
        if config.databases.contains_key(&db.alias) {
            tracing::warn!(alias = %db.alias, "duplicate database alias, keeping the first");
            continue;
        }
        config.databases.insert(db.alias.clone(), db);
    }
    Ok(config)
}

/// Enabled database descriptors, alias defaulted to the database name.
pub fn list_enabled_databases(cfg_dir: &Path) -> Result<Vec<DatabaseConfig>, ConfigError> {
    let db_dir = cfg_dir.join("database");
    let entries = std::fs::read_dir(&db_dir)
        .map_err(|e| ConfigError::Load(format!("read {}: {}", db_dir.display(), e)))?;
    let re = enable_file_re();
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() || !re.is_match(&name) {
            continue;
        }
        let text = match std::fs::read_to_string(entry.path()) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "skipping unreadable database config");
                continue;
            }
        };
        let mut cfg: DatabaseConfig = match serde_yaml::from_str(&text) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "skipping invalid database config");
                continue;
            }
        };
        if cfg.alias.is_empty() {
            cfg.alias = cfg.database.clone();
        }
        out.push(cfg);
    }
    Ok(out)
}

/// Table names with a `<name>.disable.yaml` present; a missing directory is
/// simply empty.
pub fn list_disabled_tables(table_dir: &Path) -> HashSet<String> {
    let re = disable_file_re();
    let mut out = HashSet::new();
    if let Ok(entries) = std::fs::read_dir(table_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(caps) = re.captures(&name) {
                out.insert(caps[1].to_string());
            }
        }
    }
    out
}

fn load_tables(table_dir: &Path) -> Vec<TableConfig> {
    let re = enable_file_re();
    let mut tables = Vec::new();
    let mut seen_alias = HashSet::new();
    let Ok(entries) = std::fs::read_dir(table_dir) else {
        return tables;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !re.is_match(&name) {
            continue;
        }
        let text = match std::fs::read_to_string(entry.path()) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "skipping unreadable table config");
                continue;
            }
        };
        let mut tc: TableConfig = match serde_yaml::from_str(&text) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "skipping invalid table config");
                continue;
            }
        };
        if tc.alias.is_empty() {
            tc.alias = tc.name.clone();
        }
        if !seen_alias.insert(tc.alias.clone()) {
            tracing::warn!(alias = %tc.alias, "duplicate table alias, keeping the first");
            continue;
        }
        tables.push(tc);
    }
    tables.sort_by(|a, b| a.alias.cmp(&b.alias));
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn loads_enabled_and_skips_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("_base.yaml"), "default_page_size: 25\n");
        write(
            &root.join("database/test.enable.yaml"),
            "type: sqlite\ndsn: 'sqlite::memory:'\ndatabase: test\nalias: test\n",
        );
        write(
            &root.join("database/old.disable.yaml"),
            "type: sqlite\ndsn: 'sqlite::memory:'\ndatabase: old\n",
        );
        write(&root.join("table/test/user.enable.yaml"), "name: user\nprimary_key: id\n");
        write(&root.join("table/test/tmp.disable.yaml"), "name: tmp\n");

        let cfg = load_config(root).unwrap();
        assert_eq!(cfg.base.default_page_size, 25);
        assert_eq!(cfg.databases.len(), 1);
        let db = &cfg.databases["test"];
        assert_eq!(db.tables.len(), 1);
        assert_eq!(db.tables[0].alias, "user");
    }

    #[test]
    fn invalid_table_yaml_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("_base.yaml"), "{}\n");
        write(
            &root.join("database/d.enable.yaml"),
            "type: sqlite\ndsn: 'sqlite::memory:'\ndatabase: d\n",
        );
        write(&root.join("table/d/ok.enable.yaml"), "name: ok\n");
        write(&root.join("table/d/bad.enable.yaml"), "name: [unclosed\n");
        let cfg = load_config(root).unwrap();
        assert_eq!(cfg.databases["d"].tables.len(), 1);
    }

    #[test]
    fn missing_base_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(dir.path()).is_err());
    }

    #[test]
    fn disabled_table_listing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("table/d/a.disable.yaml"), "name: a\n");
        write(&root.join("table/d/b.enable.yaml"), "name: b\n");
        let disabled = list_disabled_tables(&root.join("table/d"));
        assert!(disabled.contains("a"));
        assert!(!disabled.contains("b"));
        assert!(list_disabled_tables(&root.join("table/none")).is_empty());
    }
}
