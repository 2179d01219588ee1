//! SQL Server adapter: tiberius behind a bb8 pool, reusing the dialect-aware
//! SQL builder with `@Pn` placeholders.

use crate::adapter::sql::{
    build_batch_delete, build_delete, build_exists_count, build_filtered_count, build_get_one, build_insert,
    build_list, build_update, QueryBuf, SqlDialect,
};
use crate::adapter::{DatabaseAdapter, ListParams, Record};
use crate::config::{DatabaseConfig, TableConfig};
use crate::error::AppError;
use async_trait::async_trait;
use serde_json::Value;

const DIALECT: SqlDialect = SqlDialect::SqlServer;

/// Owned parameter storage satisfying tiberius' borrow-based `ToSql`.
enum MsVal {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl MsVal {
    fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => MsVal::Null,
            Value::Bool(b) => MsVal::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    MsVal::I64(i)
                } else {
                    MsVal::F64(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => MsVal::Str(s.clone()),
            other => MsVal::Str(other.to_string()),
        }
    }
}

impl tiberius::ToSql for MsVal {
    fn to_sql(&self) -> tiberius::ColumnData<'_> {
        match self {
            MsVal::Null => tiberius::ColumnData::String(None),
            MsVal::Bool(b) => tiberius::ColumnData::Bit(Some(*b)),
            MsVal::I64(n) => tiberius::ColumnData::I64(Some(*n)),
            MsVal::F64(f) => tiberius::ColumnData::F64(Some(*f)),
            MsVal::Str(s) => tiberius::ColumnData::String(Some(s.as_str().into())),
        }
    }
}

fn to_params(values: &[Value]) -> Vec<MsVal> {
    values.iter().map(MsVal::from_json).collect()
}

pub(crate) fn parse_config(dsn: &str) -> Result<tiberius::Config, tiberius::error::Error> {
    tiberius::Config::from_ado_string(dsn).or_else(|_| tiberius::Config::from_jdbc_string(dsn))
}

pub(crate) fn row_to_json(row: &tiberius::Row) -> Record {
    let mut map = Record::new();
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    for (i, name) in names.into_iter().enumerate() {
        map.insert(name, cell_to_value(row, i));
    }
    map
}

fn cell_to_value(row: &tiberius::Row, i: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<i64, _>(i) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(i) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i16, _>(i) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<u8, _>(i) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(i) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<f32, _>(i) {
        return Value::from(v as f64);
    }
    if let Ok(Some(v)) = row.try_get::<bool, _>(i) {
        return Value::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<rust_decimal::Decimal, _>(i) {
        if let Ok(f) = v.to_string().parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<uuid::Uuid, _>(i) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDateTime, _>(i) {
        return Value::String(v.format("%Y-%m-%d %H:%M:%S%.6f").to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDate, _>(i) {
        return Value::String(v.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(i) {
        return Value::String(v.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string());
    }
    if let Ok(Some(v)) = row.try_get::<&str, _>(i) {
        return Value::String(v.to_string());
    }
    Value::Null
}

pub struct MssqlAdapter {
    pool: bb8::Pool<bb8_tiberius::ConnectionManager>,
}

impl MssqlAdapter {
    pub async fn connect(db: &DatabaseConfig) -> Result<Self, AppError> {
        let config = parse_config(&db.dsn)?;
        let mgr = bb8_tiberius::ConnectionManager::build(config)
            .map_err(|e| AppError::Backend(e.to_string()))?;
        let mut builder = bb8::Pool::builder();
        if db.pool.max_open_conns > 0 {
            builder = builder.max_size(db.pool.max_open_conns);
        }
        if db.pool.max_idle_time > 0 {
            builder = builder.idle_timeout(Some(std::time::Duration::from_secs(db.pool.max_idle_time)));
        }
        if db.pool.max_life_time > 0 {
            builder = builder.max_lifetime(Some(std::time::Duration::from_secs(db.pool.max_life_time)));
        }
        let pool = builder
            .build(mgr)
            .await
            .map_err(|e| AppError::Backend(e.to_string()))?;
        Ok(MssqlAdapter { pool })
    }

    async fn conn(&self) -> Result<bb8::PooledConnection<'_, bb8_tiberius::ConnectionManager>, AppError> {
        self.pool.get().await.map_err(|e| AppError::Backend(e.to_string()))
    }

    async fn fetch_all(&self, q: &QueryBuf) -> Result<Vec<Record>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut conn = self.conn().await?;
        let params = to_params(&q.params);
        let refs: Vec<&dyn tiberius::ToSql> = params.iter().map(|p| p as &dyn tiberius::ToSql).collect();
        let rows = conn.query(q.sql.as_str(), &refs).await?.into_first_result().await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn fetch_count(&self, q: &QueryBuf) -> Result<i64, AppError> {
        let rows = self.fetch_all(q).await?;
        Ok(rows
            .first()
            .and_then(|r| r.values().next())
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }

    async fn execute(&self, q: &QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let mut conn = self.conn().await?;
        let params = to_params(&q.params);
        let refs: Vec<&dyn tiberius::ToSql> = params.iter().map(|p| p as &dyn tiberius::ToSql).collect();
        let result = conn.execute(q.sql.as_str(), &refs).await?;
        Ok(result.total())
    }
}

#[async_trait]
impl DatabaseAdapter for MssqlAdapter {
    async fn list(&self, table: &TableConfig, params: &ListParams) -> Result<(Vec<Record>, i64), AppError> {
        let total = if params.is_filtered() {
            self.fetch_count(&build_filtered_count(DIALECT, table, params)).await?
        } else {
            0
        };
        let rows = self.fetch_all(&build_list(DIALECT, table, params)).await?;
        Ok((rows, total))
    }

    async fn batch_create(&self, table: &TableConfig, mut records: Vec<Record>) -> Result<(Vec<Value>, Vec<Record>), AppError> {
        let pk = table.primary_key.clone();
        let mut conn = self.conn().await?;
        conn.simple_query("BEGIN TRAN").await?.into_results().await?;
        for record in records.iter_mut() {
            let q = build_insert(DIALECT, table, record);
            tracing::debug!(sql = %q.sql, params = ?q.params, "insert");
            let params = to_params(&q.params);
            let refs: Vec<&dyn tiberius::ToSql> = params.iter().map(|p| p as &dyn tiberius::ToSql).collect();
            let res = conn.execute(q.sql.as_str(), &refs).await;
            if let Err(e) = res {
                let _ = conn.simple_query("ROLLBACK").await;
                return Err(e.into());
            }
            if !pk.is_empty() && !record.contains_key(&pk) {
                let rows = conn
                    .simple_query("SELECT CAST(SCOPE_IDENTITY() AS BIGINT) AS id")
                    .await?
                    .into_first_result()
                    .await?;
                if let Some(row) = rows.first() {
                    if let Ok(Some(id)) = row.try_get::<i64, _>(0) {
                        record.insert(pk.clone(), Value::from(id));
                    }
                }
            }
        }
        conn.simple_query("COMMIT").await?.into_results().await?;
        Ok((Vec::new(), records))
    }

    async fn batch_update(&self, table: &TableConfig, records: Vec<Record>) -> Result<(i64, i64), AppError> {
        let pk = &table.primary_key;
        let mut queries = Vec::with_capacity(records.len());
        for record in &records {
            let id = record
                .get(pk)
                .ok_or_else(|| AppError::BadRequest(format!("record missing primary key '{}'", pk)))?;
            let mut data = record.clone();
            data.remove(pk);
            if data.is_empty() {
                continue;
            }
            let mut filter = Record::new();
            filter.insert(pk.clone(), id.clone());
            queries.push(build_update(DIALECT, table, &filter, &data, false));
        }

        let mut conn = self.conn().await?;
        conn.simple_query("BEGIN TRAN").await?.into_results().await?;
        let mut affected: u64 = 0;
        for q in &queries {
            tracing::debug!(sql = %q.sql, params = ?q.params, "update");
            let params = to_params(&q.params);
            let refs: Vec<&dyn tiberius::ToSql> = params.iter().map(|p| p as &dyn tiberius::ToSql).collect();
            match conn.execute(q.sql.as_str(), &refs).await {
                Ok(res) => affected += res.total(),
                Err(e) => {
                    let _ = conn.simple_query("ROLLBACK").await;
                    return Err(e.into());
                }
            }
        }
        conn.simple_query("COMMIT").await?.into_results().await?;
        Ok((affected as i64, affected as i64))
    }

    async fn batch_delete(&self, table: &TableConfig, ids: Vec<Value>) -> Result<i64, AppError> {
        let q = build_batch_delete(DIALECT, table, &ids);
        Ok(self.execute(&q).await? as i64)
    }

    async fn get_one(&self, table: &TableConfig, filter: &Record, fields: &str) -> Result<Record, AppError> {
        let q = build_get_one(DIALECT, table, filter, fields);
        self.fetch_all(&q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(AppError::record_not_found)
    }

    async fn update_one(&self, table: &TableConfig, filter: &Record, data: Record) -> Result<(i64, i64), AppError> {
        let q = build_update(DIALECT, table, filter, &data, true);
        let affected = self.execute(&q).await?;
        if affected == 0 {
            let exists = self.fetch_count(&build_exists_count(DIALECT, table, filter)).await?;
            if exists == 0 {
                return Err(AppError::record_not_found());
            }
        }
        Ok((affected as i64, affected as i64))
    }

    async fn delete_one(&self, table: &TableConfig, filter: &Record) -> Result<i64, AppError> {
        let q = build_delete(DIALECT, table, filter);
        let affected = self.execute(&q).await?;
        if affected == 0 {
            let exists = self.fetch_count(&build_exists_count(DIALECT, table, filter)).await?;
            if exists == 0 {
                return Err(AppError::record_not_found());
            }
        }
        Ok(affected as i64)
    }

    async fn count_all(&self, table: &TableConfig) -> Result<i64, AppError> {
        let q = build_filtered_count(DIALECT, table, &ListParams::default());
        self.fetch_count(&q).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        conn.simple_query("SELECT 1").await?.into_results().await?;
        Ok(())
    }

    async fn close(&self) {}
}
