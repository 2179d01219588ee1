//! Shared application state for all routes: the loaded config, the adapter
//! registry (written once at startup, read per request) and the count cache.

use crate::adapter::DatabaseAdapter;
use crate::config::{DatabaseConfig, GatewayConfig, TableConfig};
use crate::counts::CountCache;
use crate::error::AppError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

pub type SharedAdapter = Arc<dyn DatabaseAdapter>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub adapters: Arc<RwLock<HashMap<String, SharedAdapter>>>,
    pub counts: CountCache,
    /// Config root; the swagger route reads generated files from here.
    pub cfg_dir: Arc<PathBuf>,
    /// Loopback base for the GraphQL resolvers.
    pub rest_base_url: Arc<String>,
}

impl AppState {
    pub fn new(config: GatewayConfig, cfg_dir: PathBuf, rest_base_url: String) -> Self {
        AppState {
            config: Arc::new(config),
            adapters: Arc::new(RwLock::new(HashMap::new())),
            counts: CountCache::default(),
            cfg_dir: Arc::new(cfg_dir),
            rest_base_url: Arc::new(rest_base_url),
        }
    }

    pub fn insert_adapter(&self, db_alias: &str, adapter: SharedAdapter) {
        if let Ok(mut map) = self.adapters.write() {
            map.insert(db_alias.to_string(), adapter);
        }
    }

    pub fn adapter(&self, db_alias: &str) -> Option<SharedAdapter> {
        self.adapters.read().ok()?.get(db_alias).cloned()
    }

    pub fn adapter_entries(&self) -> Vec<(String, SharedAdapter)> {
        self.adapters
            .read()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Adapter plus table config for one routed request.
    pub fn route(&self, db_alias: &str, table_alias: &str) -> Result<(SharedAdapter, &DatabaseConfig, &TableConfig), AppError> {
        let (db, table) = self
            .config
            .table(db_alias, table_alias)
            .ok_or_else(|| AppError::NotFound(format!("table {} in database {} not found", table_alias, db_alias)))?;
        let adapter = self
            .adapter(db_alias)
            .ok_or_else(|| AppError::NotFound(format!("database {} not available", db_alias)))?;
        Ok((adapter, db, table))
    }
}
