//! Backend adapters: one implementation of the uniform operation set per
//! store, dispatched behind a narrow trait object.

pub mod clickhouse;
pub mod filter;
pub mod mongo;
pub mod mssql;
pub mod sql;

use crate::config::{DatabaseConfig, DbKind, TableConfig};
use crate::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static SLOW_QUERY_THRESHOLD: OnceLock<Duration> = OnceLock::new();

pub fn set_slow_query_threshold(ms: u64) {
    let _ = SLOW_QUERY_THRESHOLD.set(Duration::from_millis(ms));
}

pub(crate) fn warn_if_slow(sql: &str, started: Instant) {
    let threshold = SLOW_QUERY_THRESHOLD.get().copied().unwrap_or(Duration::from_secs(1));
    let elapsed = started.elapsed();
    if !threshold.is_zero() && elapsed >= threshold {
        tracing::warn!(sql = %sql, elapsed_ms = elapsed.as_millis() as u64, "slow query");
    }
}

/// One row/document as it travels through the gateway.
pub type Record = serde_json::Map<String, Value>;

#[derive(Clone, Debug, Default)]
pub struct ListParams {
    pub page: i64,
    pub page_size: i64,
    pub fields: String,
    pub order: String,
    /// Non-reserved query parameters, still raw.
    pub filters: Vec<(String, String)>,
}

impl ListParams {
    pub fn is_filtered(&self) -> bool {
        !self.filters.is_empty()
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

/// The uniform capability surface every backend provides. Reads see through
/// the soft-delete marker; deletes become marker updates when one is
/// configured.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Rows plus the filtered total; the total is 0 when the request carried
    /// no filters (the caller substitutes the cached count).
    async fn list(&self, table: &TableConfig, params: &ListParams) -> Result<(Vec<Record>, i64), AppError>;

    /// Returns backend-generated ids (document stores) and the echoed rows
    /// (relational backends fill auto-increment keys into the rows).
    async fn batch_create(&self, table: &TableConfig, records: Vec<Record>) -> Result<(Vec<Value>, Vec<Record>), AppError>;

    /// `(matched, modified)`; a row without the primary key is a bad request.
    async fn batch_update(&self, table: &TableConfig, records: Vec<Record>) -> Result<(i64, i64), AppError>;

    async fn batch_delete(&self, table: &TableConfig, ids: Vec<Value>) -> Result<i64, AppError>;

    async fn get_one(&self, table: &TableConfig, filter: &Record, fields: &str) -> Result<Record, AppError>;

    /// `(matched, modified)`; not-found when nothing matches the filter at
    /// all.
    async fn update_one(&self, table: &TableConfig, filter: &Record, data: Record) -> Result<(i64, i64), AppError>;

    async fn delete_one(&self, table: &TableConfig, filter: &Record) -> Result<i64, AppError>;

    async fn count_all(&self, table: &TableConfig) -> Result<i64, AppError>;

    async fn ping(&self) -> Result<(), AppError>;

    async fn close(&self);
}

/// Connect the adapter for one configured database and verify it answers
/// within the startup ping window.
pub async fn connect(db: &DatabaseConfig) -> Result<Arc<dyn DatabaseAdapter>, AppError> {
    let adapter: Arc<dyn DatabaseAdapter> = match db.kind {
        DbKind::MySql | DbKind::Postgres | DbKind::Sqlite => Arc::new(sql::SqlAdapter::connect(db).await?),
        DbKind::SqlServer => Arc::new(mssql::MssqlAdapter::connect(db).await?),
        DbKind::ClickHouse => Arc::new(clickhouse::ClickHouseAdapter::connect(db)?),
        DbKind::MongoDb => Arc::new(mongo::MongoAdapter::connect(db).await?),
    };
    tokio::time::timeout(Duration::from_secs(5), adapter.ping())
        .await
        .map_err(|_| AppError::Backend(format!("ping {} timed out", db.alias)))??;
    Ok(adapter)
}
