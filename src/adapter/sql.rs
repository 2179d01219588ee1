//! The sqlx adapter covering MySQL, PostgreSQL and SQLite. SQL text is
//! assembled dialect-aware with identifiers quoted and every value bound as
//! a parameter; rows come back as JSON objects.

use crate::adapter::filter::{
    collect_conditions, normalize_like_value, parse_filter_value, parse_filter_values, FilterCondition, FilterOp,
};
use crate::adapter::{DatabaseAdapter, ListParams, Record};
use crate::config::{DatabaseConfig, DbKind, SoftDeleteType, TableConfig};
use crate::error::AppError;
use crate::idgen::now_timestamp;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{MySqlPool, PgPool, Row, SqlitePool};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlDialect {
    MySql,
    Postgres,
    Sqlite,
    SqlServer,
}

impl SqlDialect {
    fn quote(&self, ident: &str) -> String {
        match self {
            SqlDialect::MySql => format!("`{}`", ident.replace('`', "``")),
            SqlDialect::SqlServer => format!("[{}]", ident.replace(']', "]]")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    fn placeholder(&self, n: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", n),
            SqlDialect::SqlServer => format!("@P{}", n),
            _ => "?".to_string(),
        }
    }

    /// SQL Server pages with OFFSET/FETCH and insists on an ORDER BY.
    fn paging(&self, page_size: i64, offset: i64, has_order: bool) -> String {
        match self {
            SqlDialect::SqlServer => {
                let order = if has_order { "" } else { " ORDER BY (SELECT NULL)" };
                format!("{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", order, offset, page_size)
            }
            _ => format!(" LIMIT {} OFFSET {}", page_size, offset),
        }
    }
}

/// SQL plus its bound values, in placeholder order.
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Accumulates WHERE fragments with dialect-correct placeholders.
struct WhereBuilder {
    dialect: SqlDialect,
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl WhereBuilder {
    fn new(dialect: SqlDialect) -> Self {
        WhereBuilder {
            dialect,
            clauses: Vec::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> String {
        self.params.push(v);
        self.dialect.placeholder(self.params.len())
    }

    /// Reads never see soft-deleted rows; deletes target only live rows so
    /// a repeated delete is a no-op.
    fn soft_delete(&mut self, table: &TableConfig) {
        if table.softdel_key.is_empty() {
            return;
        }
        let key = self.dialect.quote(&table.softdel_key);
        match table.softdel_type {
            Some(SoftDeleteType::Boolean) => {
                let ph = self.push_param(Value::Bool(false));
                self.clauses.push(format!("{} = {}", key, ph));
            }
            Some(SoftDeleteType::Int) => {
                let ph = self.push_param(Value::from(0));
                self.clauses.push(format!("{} = {}", key, ph));
            }
            _ => self.clauses.push(format!("{} IS NULL", key)),
        }
    }

    fn eq_map(&mut self, filter: &Record) {
        for (k, v) in filter {
            let col = self.dialect.quote(k);
            let ph = self.push_param(v.clone());
            self.clauses.push(format!("{} = {}", col, ph));
        }
    }

    fn condition(&mut self, cond: &FilterCondition) {
        let col = self.dialect.quote(&cond.field);
        let raw = cond.raw.as_str();
        match cond.op {
            FilterOp::Eq | FilterOp::Ne | FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                let op = match cond.op {
                    FilterOp::Eq => "=",
                    FilterOp::Ne => "<>",
                    FilterOp::Gt => ">",
                    FilterOp::Gte => ">=",
                    FilterOp::Lt => "<",
                    _ => "<=",
                };
                let ph = self.push_param(parse_filter_value(raw));
                self.clauses.push(format!("{} {} {}", col, op, ph));
            }
            FilterOp::Like => {
                let ph = self.push_param(Value::String(normalize_like_value(raw)));
                self.clauses.push(format!("{} LIKE {}", col, ph));
            }
            FilterOp::IContains => {
                let ph = self.push_param(Value::String(format!("%{}%", normalize_like_value(raw))));
                self.clauses.push(format!("LOWER({}) LIKE LOWER({})", col, ph));
            }
            FilterOp::In => {
                let values = parse_filter_values(raw);
                if values.is_empty() {
                    return;
                }
                let phs: Vec<String> = values.into_iter().map(|v| self.push_param(v)).collect();
                self.clauses.push(format!("{} IN ({})", col, phs.join(", ")));
            }
            FilterOp::IsNull => match parse_filter_value(raw) {
                Value::Bool(true) => self.clauses.push(format!("{} IS NULL", col)),
                Value::Bool(false) => self.clauses.push(format!("{} IS NOT NULL", col)),
                _ => {}
            },
            FilterOp::Between => {
                let values = parse_filter_values(raw);
                if values.len() == 2 {
                    let lo = self.push_param(values[0].clone());
                    let hi = self.push_param(values[1].clone());
                    self.clauses.push(format!("{} BETWEEN {} AND {}", col, lo, hi));
                }
            }
        }
    }

    fn clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn select_columns(dialect: SqlDialect, fields: &str) -> String {
    if fields.is_empty() {
        return "*".into();
    }
    fields
        .split(',')
        .map(|f| dialect.quote(f.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn order_clause(dialect: SqlDialect, order: &str) -> String {
    if order.is_empty() {
        return String::new();
    }
    match order.strip_prefix('-') {
        Some(field) => format!(" ORDER BY {} DESC", dialect.quote(field)),
        None => format!(" ORDER BY {} ASC", dialect.quote(order)),
    }
}

pub(crate) fn build_list(dialect: SqlDialect, table: &TableConfig, params: &ListParams) -> QueryBuf {
    let mut wb = WhereBuilder::new(dialect);
    wb.soft_delete(table);
    for cond in collect_conditions(&params.filters) {
        wb.condition(&cond);
    }
    let sql = format!(
        "SELECT {} FROM {}{}{}{}",
        select_columns(dialect, &params.fields),
        dialect.quote(&table.name),
        wb.clause(),
        order_clause(dialect, &params.order),
        dialect.paging(params.page_size, params.offset(), !params.order.is_empty()),
    );
    QueryBuf { sql, params: wb.params }
}

pub(crate) fn build_filtered_count(dialect: SqlDialect, table: &TableConfig, params: &ListParams) -> QueryBuf {
    let mut wb = WhereBuilder::new(dialect);
    wb.soft_delete(table);
    for cond in collect_conditions(&params.filters) {
        wb.condition(&cond);
    }
    let sql = format!("SELECT COUNT(*) FROM {}{}", dialect.quote(&table.name), wb.clause());
    QueryBuf { sql, params: wb.params }
}

pub(crate) fn build_get_one(dialect: SqlDialect, table: &TableConfig, filter: &Record, fields: &str) -> QueryBuf {
    let mut wb = WhereBuilder::new(dialect);
    wb.soft_delete(table);
    wb.eq_map(filter);
    let sql = if dialect == SqlDialect::SqlServer {
        format!(
            "SELECT TOP 1 {} FROM {}{}",
            select_columns(dialect, fields),
            dialect.quote(&table.name),
            wb.clause(),
        )
    } else {
        format!(
            "SELECT {} FROM {}{} LIMIT 1",
            select_columns(dialect, fields),
            dialect.quote(&table.name),
            wb.clause(),
        )
    };
    QueryBuf { sql, params: wb.params }
}

pub(crate) fn build_insert(dialect: SqlDialect, table: &TableConfig, record: &Record) -> QueryBuf {
    let mut cols = Vec::with_capacity(record.len());
    let mut phs = Vec::with_capacity(record.len());
    let mut params = Vec::with_capacity(record.len());
    for (k, v) in record {
        cols.push(dialect.quote(k));
        params.push(v.clone());
        phs.push(dialect.placeholder(params.len()));
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.quote(&table.name),
        cols.join(", "),
        phs.join(", "),
    );
    QueryBuf { sql, params }
}

pub(crate) fn build_update(dialect: SqlDialect, table: &TableConfig, filter: &Record, data: &Record, soft_delete_guard: bool) -> QueryBuf {
    let mut params = Vec::new();
    let mut sets = Vec::with_capacity(data.len());
    for (k, v) in data {
        params.push(v.clone());
        sets.push(format!("{} = {}", dialect.quote(k), dialect.placeholder(params.len())));
    }
    let mut wb = WhereBuilder::new(dialect);
    wb.params = params;
    if soft_delete_guard {
        wb.soft_delete(table);
    }
    wb.eq_map(filter);
    let sql = format!(
        "UPDATE {} SET {}{}",
        dialect.quote(&table.name),
        sets.join(", "),
        wb.clause(),
    );
    QueryBuf { sql, params: wb.params }
}

pub(crate) fn build_exists_count(dialect: SqlDialect, table: &TableConfig, filter: &Record) -> QueryBuf {
    let mut wb = WhereBuilder::new(dialect);
    wb.eq_map(filter);
    let sql = format!("SELECT COUNT(*) FROM {}{}", dialect.quote(&table.name), wb.clause());
    QueryBuf { sql, params: wb.params }
}

/// The marker value written by a soft delete.
pub(crate) fn soft_delete_value(table: &TableConfig) -> Value {
    match table.softdel_type {
        Some(SoftDeleteType::Boolean) => Value::Bool(true),
        Some(SoftDeleteType::Int) => Value::from(1),
        _ => Value::String(now_timestamp()),
    }
}

pub(crate) fn build_delete(dialect: SqlDialect, table: &TableConfig, filter: &Record) -> QueryBuf {
    if table.softdel_key.is_empty() {
        let mut wb = WhereBuilder::new(dialect);
        wb.eq_map(filter);
        let sql = format!("DELETE FROM {}{}", dialect.quote(&table.name), wb.clause());
        QueryBuf { sql, params: wb.params }
    } else {
        let mut data = Record::new();
        data.insert(table.softdel_key.clone(), soft_delete_value(table));
        build_update(dialect, table, filter, &data, true)
    }
}

pub(crate) fn build_batch_delete(dialect: SqlDialect, table: &TableConfig, ids: &[Value]) -> QueryBuf {
    let pk = &table.primary_key;
    let mut set_sql = String::new();
    let mut wb = WhereBuilder::new(dialect);
    if !table.softdel_key.is_empty() {
        wb.params.push(soft_delete_value(table));
        set_sql = format!(
            " SET {} = {}",
            dialect.quote(&table.softdel_key),
            dialect.placeholder(1)
        );
        wb.soft_delete(table);
    }
    let phs: Vec<String> = ids.iter().map(|id| wb.push_param(id.clone())).collect();
    wb.clauses.push(format!("{} IN ({})", dialect.quote(pk), phs.join(", ")));
    let sql = if table.softdel_key.is_empty() {
        format!("DELETE FROM {}{}", dialect.quote(&table.name), wb.clause())
    } else {
        format!("UPDATE {}{}{}", dialect.quote(&table.name), set_sql, wb.clause())
    };
    QueryBuf { sql, params: wb.params }
}

/// Bind a JSON value list onto any sqlx query type.
macro_rules! bind_all {
    ($query:expr, $params:expr) => {{
        let mut q = $query;
        for p in $params.iter() {
            q = match p {
                Value::Null => q.bind(None::<String>),
                Value::Bool(b) => q.bind(*b),
                Value::Number(n) if n.is_i64() => q.bind(n.as_i64().unwrap_or_default()),
                Value::Number(n) if n.is_u64() => q.bind(n.as_u64().unwrap_or_default() as i64),
                Value::Number(n) => q.bind(n.as_f64().unwrap_or_default()),
                Value::String(s) => q.bind(s.clone()),
                other => q.bind(other.to_string()),
            };
        }
        q
    }};
}

fn mysql_row_to_json(row: &sqlx::mysql::MySqlRow) -> Record {
    use sqlx::Column;
    let mut map = Record::new();
    for col in row.columns() {
        map.insert(col.name().to_string(), mysql_cell(row, col.name()));
    }
    map
}

fn mysql_cell(row: &sqlx::mysql::MySqlRow, name: &str) -> Value {
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(name) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(name) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(name) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(name) {
        return Value::from(v as f64);
    }
    if let Ok(Some(v)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<rust_decimal::Decimal>, _>(name) {
        return decimal_to_value(&v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(v.format("%Y-%m-%d %H:%M:%S%.6f").to_string());
    }
    if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(v.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<serde_json::Value>, _>(name) {
        return v;
    }
    Value::Null
}

fn pg_row_to_json(row: &sqlx::postgres::PgRow) -> Record {
    use sqlx::Column;
    let mut map = Record::new();
    for col in row.columns() {
        map.insert(col.name().to_string(), pg_cell(row, col.name()));
    }
    map
}

fn pg_cell(row: &sqlx::postgres::PgRow, name: &str) -> Value {
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(name) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(name) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(name) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(name) {
        return Value::from(v as f64);
    }
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(name) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<rust_decimal::Decimal>, _>(name) {
        return decimal_to_value(&v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(v.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string());
    }
    if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(v.format("%Y-%m-%d %H:%M:%S%.6f").to_string());
    }
    if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(v.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<serde_json::Value>, _>(name) {
        return v;
    }
    Value::Null
}

fn sqlite_row_to_json(row: &sqlx::sqlite::SqliteRow) -> Record {
    use sqlx::Column;
    let mut map = Record::new();
    for col in row.columns() {
        map.insert(col.name().to_string(), sqlite_cell(row, col.name()));
    }
    map
}

fn sqlite_cell(row: &sqlx::sqlite::SqliteRow, name: &str) -> Value {
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(name) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(name) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(v);
    }
    Value::Null
}

/// Numeric columns decode through `Decimal`; emit a JSON number when the
/// value survives the f64 round-trip.
fn decimal_to_value(s: &str) -> Value {
    if let Ok(f) = s.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(s.to_string())
}

enum SqlBackend {
    MySql(MySqlPool),
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

pub struct SqlAdapter {
    backend: SqlBackend,
}

impl SqlAdapter {
    pub async fn connect(db: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = &db.pool;
        let backend = match db.kind {
            DbKind::MySql => {
                let mut opts = sqlx::mysql::MySqlPoolOptions::new();
                if pool.max_open_conns > 0 {
                    opts = opts.max_connections(pool.max_open_conns);
                }
                if pool.max_idle_conns > 0 {
                    opts = opts.min_connections(pool.max_idle_conns);
                }
                if pool.max_life_time > 0 {
                    opts = opts.max_lifetime(Duration::from_secs(pool.max_life_time));
                }
                if pool.max_idle_time > 0 {
                    opts = opts.idle_timeout(Duration::from_secs(pool.max_idle_time));
                }
                SqlBackend::MySql(opts.connect(&db.dsn).await?)
            }
            DbKind::Postgres => {
                let mut opts = sqlx::postgres::PgPoolOptions::new();
                if pool.max_open_conns > 0 {
                    opts = opts.max_connections(pool.max_open_conns);
                }
                if pool.max_idle_conns > 0 {
                    opts = opts.min_connections(pool.max_idle_conns);
                }
                if pool.max_life_time > 0 {
                    opts = opts.max_lifetime(Duration::from_secs(pool.max_life_time));
                }
                if pool.max_idle_time > 0 {
                    opts = opts.idle_timeout(Duration::from_secs(pool.max_idle_time));
                }
                SqlBackend::Postgres(opts.connect(&db.dsn).await?)
            }
            DbKind::Sqlite => {
                let mut opts = sqlx::sqlite::SqlitePoolOptions::new();
                if pool.max_open_conns > 0 {
                    opts = opts.max_connections(pool.max_open_conns);
                }
                SqlBackend::Sqlite(opts.connect(&db.dsn).await?)
            }
            other => return Err(AppError::Backend(format!("not a sqlx backend: {}", other.as_str()))),
        };
        Ok(SqlAdapter { backend })
    }

    /// Wrap an already-built pool; used by tests.
    pub fn from_sqlite_pool(pool: SqlitePool) -> Self {
        SqlAdapter {
            backend: SqlBackend::Sqlite(pool),
        }
    }

    fn dialect(&self) -> SqlDialect {
        match self.backend {
            SqlBackend::MySql(_) => SqlDialect::MySql,
            SqlBackend::Postgres(_) => SqlDialect::Postgres,
            SqlBackend::Sqlite(_) => SqlDialect::Sqlite,
        }
    }

    async fn fetch_all(&self, q: &QueryBuf) -> Result<Vec<Record>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let started = std::time::Instant::now();
        let out = match &self.backend {
            SqlBackend::MySql(pool) => {
                let rows = bind_all!(sqlx::query(&q.sql), q.params).fetch_all(pool).await?;
                rows.iter().map(mysql_row_to_json).collect()
            }
            SqlBackend::Postgres(pool) => {
                let rows = bind_all!(sqlx::query(&q.sql), q.params).fetch_all(pool).await?;
                rows.iter().map(pg_row_to_json).collect()
            }
            SqlBackend::Sqlite(pool) => {
                let rows = bind_all!(sqlx::query(&q.sql), q.params).fetch_all(pool).await?;
                rows.iter().map(sqlite_row_to_json).collect()
            }
        };
        crate::adapter::warn_if_slow(&q.sql, started);
        Ok(out)
    }

    async fn fetch_optional(&self, q: &QueryBuf) -> Result<Option<Record>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        Ok(match &self.backend {
            SqlBackend::MySql(pool) => bind_all!(sqlx::query(&q.sql), q.params)
                .fetch_optional(pool)
                .await?
                .map(|r| mysql_row_to_json(&r)),
            SqlBackend::Postgres(pool) => bind_all!(sqlx::query(&q.sql), q.params)
                .fetch_optional(pool)
                .await?
                .map(|r| pg_row_to_json(&r)),
            SqlBackend::Sqlite(pool) => bind_all!(sqlx::query(&q.sql), q.params)
                .fetch_optional(pool)
                .await?
                .map(|r| sqlite_row_to_json(&r)),
        })
    }

    async fn fetch_count(&self, q: &QueryBuf) -> Result<i64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "count");
        Ok(match &self.backend {
            SqlBackend::MySql(pool) => {
                bind_all!(sqlx::query_scalar::<_, i64>(&q.sql), q.params)
                    .fetch_one(pool)
                    .await?
            }
            SqlBackend::Postgres(pool) => {
                bind_all!(sqlx::query_scalar::<_, i64>(&q.sql), q.params)
                    .fetch_one(pool)
                    .await?
            }
            SqlBackend::Sqlite(pool) => {
                bind_all!(sqlx::query_scalar::<_, i64>(&q.sql), q.params)
                    .fetch_one(pool)
                    .await?
            }
        })
    }

    async fn execute(&self, q: &QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let started = std::time::Instant::now();
        let affected = match &self.backend {
            SqlBackend::MySql(pool) => bind_all!(sqlx::query(&q.sql), q.params).execute(pool).await?.rows_affected(),
            SqlBackend::Postgres(pool) => bind_all!(sqlx::query(&q.sql), q.params).execute(pool).await?.rows_affected(),
            SqlBackend::Sqlite(pool) => bind_all!(sqlx::query(&q.sql), q.params).execute(pool).await?.rows_affected(),
        };
        crate::adapter::warn_if_slow(&q.sql, started);
        Ok(affected)
    }
}

fn missing_pk(pk: &str) -> AppError {
    AppError::BadRequest(format!("record missing primary key '{}'", pk))
}

#[async_trait]
impl DatabaseAdapter for SqlAdapter {
    async fn list(&self, table: &TableConfig, params: &ListParams) -> Result<(Vec<Record>, i64), AppError> {
        let total = if params.is_filtered() {
            self.fetch_count(&build_filtered_count(self.dialect(), table, params)).await?
        } else {
            0
        };
        let rows = self.fetch_all(&build_list(self.dialect(), table, params)).await?;
        Ok((rows, total))
    }

    async fn batch_create(&self, table: &TableConfig, mut records: Vec<Record>) -> Result<(Vec<Value>, Vec<Record>), AppError> {
        let dialect = self.dialect();
        let pk = table.primary_key.clone();
        match &self.backend {
            SqlBackend::MySql(pool) => {
                let mut tx = pool.begin().await?;
                for record in records.iter_mut() {
                    let q = build_insert(dialect, table, record);
                    tracing::debug!(sql = %q.sql, params = ?q.params, "insert");
                    let res = bind_all!(sqlx::query(&q.sql), q.params).execute(&mut *tx).await?;
                    let id = res.last_insert_id();
                    if !pk.is_empty() && id > 0 && !record.contains_key(&pk) {
                        record.insert(pk.clone(), Value::from(id));
                    }
                }
                tx.commit().await?;
            }
            SqlBackend::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                for record in records.iter_mut() {
                    let mut q = build_insert(dialect, table, record);
                    if !pk.is_empty() && !record.contains_key(&pk) {
                        q.sql.push_str(&format!(" RETURNING {}", dialect.quote(&pk)));
                        tracing::debug!(sql = %q.sql, params = ?q.params, "insert");
                        let row = bind_all!(sqlx::query(&q.sql), q.params).fetch_one(&mut *tx).await?;
                        record.insert(pk.clone(), pg_cell(&row, &pk));
                    } else {
                        tracing::debug!(sql = %q.sql, params = ?q.params, "insert");
                        bind_all!(sqlx::query(&q.sql), q.params).execute(&mut *tx).await?;
                    }
                }
                tx.commit().await?;
            }
            SqlBackend::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                for record in records.iter_mut() {
                    let q = build_insert(dialect, table, record);
                    tracing::debug!(sql = %q.sql, params = ?q.params, "insert");
                    let res = bind_all!(sqlx::query(&q.sql), q.params).execute(&mut *tx).await?;
                    let id = res.last_insert_rowid();
                    if !pk.is_empty() && id > 0 && !record.contains_key(&pk) {
                        record.insert(pk.clone(), Value::from(id));
                    }
                }
                tx.commit().await?;
            }
        }
        Ok((Vec::new(), records))
    }

    async fn batch_update(&self, table: &TableConfig, records: Vec<Record>) -> Result<(i64, i64), AppError> {
        let dialect = self.dialect();
        let pk = &table.primary_key;
        let mut queries = Vec::with_capacity(records.len());
        for record in &records {
            let id = record.get(pk).ok_or_else(|| missing_pk(pk))?;
            let mut data = record.clone();
            data.remove(pk);
            if data.is_empty() {
                continue;
            }
            let mut filter = Record::new();
            filter.insert(pk.clone(), id.clone());
            queries.push(build_update(dialect, table, &filter, &data, false));
        }

        let mut affected: u64 = 0;
        match &self.backend {
            SqlBackend::MySql(pool) => {
                let mut tx = pool.begin().await?;
                for q in &queries {
                    tracing::debug!(sql = %q.sql, params = ?q.params, "update");
                    affected += bind_all!(sqlx::query(&q.sql), q.params).execute(&mut *tx).await?.rows_affected();
                }
                tx.commit().await?;
            }
            SqlBackend::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                for q in &queries {
                    tracing::debug!(sql = %q.sql, params = ?q.params, "update");
                    affected += bind_all!(sqlx::query(&q.sql), q.params).execute(&mut *tx).await?.rows_affected();
                }
                tx.commit().await?;
            }
            SqlBackend::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                for q in &queries {
                    tracing::debug!(sql = %q.sql, params = ?q.params, "update");
                    affected += bind_all!(sqlx::query(&q.sql), q.params).execute(&mut *tx).await?.rows_affected();
                }
                tx.commit().await?;
            }
        }
        Ok((affected as i64, affected as i64))
    }

    async fn batch_delete(&self, table: &TableConfig, ids: Vec<Value>) -> Result<i64, AppError> {
        let q = build_batch_delete(self.dialect(), table, &ids);
        Ok(self.execute(&q).await? as i64)
    }

    async fn get_one(&self, table: &TableConfig, filter: &Record, fields: &str) -> Result<Record, AppError> {
        let q = build_get_one(self.dialect(), table, filter, fields);
        self.fetch_optional(&q).await?.ok_or_else(AppError::record_not_found)
    }

    async fn update_one(&self, table: &TableConfig, filter: &Record, data: Record) -> Result<(i64, i64), AppError> {
        let q = build_update(self.dialect(), table, filter, &data, true);
        let affected = self.execute(&q).await?;
        if affected == 0 {
            let exists = self.fetch_count(&build_exists_count(self.dialect(), table, filter)).await?;
            if exists == 0 {
                return Err(AppError::record_not_found());
            }
        }
        Ok((affected as i64, affected as i64))
    }

    async fn delete_one(&self, table: &TableConfig, filter: &Record) -> Result<i64, AppError> {
        let q = build_delete(self.dialect(), table, filter);
        let affected = self.execute(&q).await?;
        if affected == 0 {
            let exists = self.fetch_count(&build_exists_count(self.dialect(), table, filter)).await?;
            if exists == 0 {
                return Err(AppError::record_not_found());
            }
        }
        Ok(affected as i64)
    }

    async fn count_all(&self, table: &TableConfig) -> Result<i64, AppError> {
        let mut wb = WhereBuilder::new(self.dialect());
        wb.soft_delete(table);
        let q = QueryBuf {
            sql: format!("SELECT COUNT(*) FROM {}{}", self.dialect().quote(&table.name), wb.clause()),
            params: wb.params,
        };
        self.fetch_count(&q).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        let q = QueryBuf {
            sql: "SELECT 1".into(),
            params: Vec::new(),
        };
        self.fetch_count(&q).await.map(|_| ())
    }

    async fn close(&self) {
        match &self.backend {
            SqlBackend::MySql(pool) => pool.close().await,
            SqlBackend::Postgres(pool) => pool.close().await,
            SqlBackend::Sqlite(pool) => pool.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> TableConfig {
        TableConfig {
            name: "user".into(),
            alias: "user".into(),
            primary_key: "id".into(),
            ..TableConfig::default()
        }
    }

    fn soft_table() -> TableConfig {
        TableConfig {
            softdel_key: "deleted_at".into(),
            softdel_type: Some(SoftDeleteType::Timestamp),
            ..table()
        }
    }

    fn params(filters: &[(&str, &str)]) -> ListParams {
        ListParams {
            page: 1,
            page_size: 10,
            filters: filters.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..ListParams::default()
        }
    }

    #[test]
    fn list_sql_without_filters() {
        let q = build_list(SqlDialect::Sqlite, &table(), &params(&[]));
        assert_eq!(q.sql, "SELECT * FROM \"user\" LIMIT 10 OFFSET 0");
        assert!(q.params.is_empty());
    }

    #[test]
    fn list_sql_with_operators() {
        let mut p = params(&[("age__between", "2,10"), ("username__in", "alice,bob")]);
        p.order = "-age".into();
        p.fields = "id,age".into();
        let q = build_list(SqlDialect::Sqlite, &table(), &p);
        assert_eq!(
            q.sql,
            "SELECT \"id\", \"age\" FROM \"user\" WHERE \"age\" BETWEEN ? AND ? AND \"username\" IN (?, ?) ORDER BY \"age\" DESC LIMIT 10 OFFSET 0"
        );
        assert_eq!(q.params, vec![json!(2), json!(10), json!("alice"), json!("bob")]);
    }

    #[test]
    fn postgres_placeholders_are_numbered() {
        let q = build_list(SqlDialect::Postgres, &table(), &params(&[("age__gte", "3"), ("age__lte", "9")]));
        assert!(q.sql.contains("\"age\" >= $1 AND \"age\" <= $2"));
    }

    #[test]
    fn soft_delete_filter_applies_to_reads() {
        let q = build_list(SqlDialect::Sqlite, &soft_table(), &params(&[]));
        assert!(q.sql.contains("WHERE \"deleted_at\" IS NULL"));

        let int_table = TableConfig {
            softdel_type: Some(SoftDeleteType::Int),
            ..soft_table()
        };
        let q = build_list(SqlDialect::Sqlite, &int_table, &params(&[]));
        assert!(q.sql.contains("WHERE \"deleted_at\" = ?"));
        assert_eq!(q.params, vec![json!(0)]);
    }

    #[test]
    fn isnull_operator() {
        let q = build_list(SqlDialect::Sqlite, &table(), &params(&[("email__isnull", "true")]));
        assert!(q.sql.contains("\"email\" IS NULL"));
        let q = build_list(SqlDialect::Sqlite, &table(), &params(&[("email__isnull", "false")]));
        assert!(q.sql.contains("\"email\" IS NOT NULL"));
        let q = build_list(SqlDialect::Sqlite, &table(), &params(&[("email__isnull", "x")]));
        assert!(!q.sql.contains("IS NULL"));
    }

    #[test]
    fn delete_becomes_soft_update() {
        let mut filter = Record::new();
        filter.insert("id".into(), json!(7));
        let q = build_delete(SqlDialect::Sqlite, &soft_table(), &filter);
        assert!(q.sql.starts_with("UPDATE \"user\" SET \"deleted_at\" = ?"));
        assert!(q.sql.contains("\"deleted_at\" IS NULL"));
        assert!(q.sql.contains("\"id\" = ?"));

        let q = build_delete(SqlDialect::Sqlite, &table(), &filter);
        assert_eq!(q.sql, "DELETE FROM \"user\" WHERE \"id\" = ?");
    }

    #[test]
    fn batch_delete_soft_marks_live_rows_only() {
        let q = build_batch_delete(SqlDialect::Sqlite, &soft_table(), &[json!(1), json!(2)]);
        assert!(q.sql.starts_with("UPDATE \"user\" SET \"deleted_at\" = ?"));
        assert!(q.sql.contains("\"deleted_at\" IS NULL AND \"id\" IN (?, ?)"));
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn mysql_quoting_uses_backticks() {
        let q = build_list(SqlDialect::MySql, &table(), &params(&[("name", "x")]));
        assert!(q.sql.contains("`user`"));
        assert!(q.sql.contains("`name` = ?"));
    }

    #[test]
    fn insert_lists_columns_in_record_order() {
        let mut rec = Record::new();
        rec.insert("age".into(), json!(3));
        rec.insert("email".into(), json!("a@x"));
        let q = build_insert(SqlDialect::Sqlite, &table(), &rec);
        assert_eq!(q.sql, "INSERT INTO \"user\" (\"age\", \"email\") VALUES (?, ?)");
    }
}
