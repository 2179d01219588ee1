//! ClickHouse adapter over the HTTP interface. Results come back as
//! `FORMAT JSON`, inserts go in as `JSONEachRow`, and updates/deletes are
//! rewritten to `ALTER TABLE` mutations. ClickHouse reports no affected-row
//! counts, so mutation results carry the matched cardinality instead.

use crate::adapter::filter::{
    collect_conditions, normalize_like_value, parse_filter_value, parse_filter_values, FilterCondition, FilterOp,
};
use crate::adapter::{DatabaseAdapter, ListParams, Record};
use crate::config::{DatabaseConfig, SoftDeleteType, TableConfig};
use crate::error::AppError;
use crate::idgen::now_timestamp;
use async_trait::async_trait;
use serde_json::Value;

pub(crate) struct ClickHouseHttp {
    client: reqwest::Client,
    base: reqwest::Url,
    user: Option<String>,
    password: Option<String>,
}

impl ClickHouseHttp {
    /// The DSN is the HTTP endpoint (`http://host:8123`), credentials in the
    /// URL userinfo.
    pub fn new(dsn: &str, alias: &str) -> Result<Self, AppError> {
        let mut base = reqwest::Url::parse(dsn).map_err(|e| {
            AppError::Config(crate::error::ConfigError::InvalidDsn {
                alias: alias.to_string(),
                reason: e.to_string(),
            })
        })?;
        let user = (!base.username().is_empty()).then(|| base.username().to_string());
        let password = base.password().map(|p| p.to_string());
        let _ = base.set_username("");
        let _ = base.set_password(None);
        base.set_query(None);
        Ok(ClickHouseHttp {
            client: reqwest::Client::new(),
            base,
            user,
            password,
        })
    }

    fn request(&self, database: &str) -> reqwest::RequestBuilder {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("database", database)
            .append_pair("output_format_json_quote_64bit_integers", "0");
        let mut req = self.client.post(url);
        if let Some(user) = &self.user {
            req = req.basic_auth(user, self.password.as_deref());
        }
        req
    }

    pub(crate) async fn query_json(&self, database: &str, sql: &str) -> Result<Vec<Record>, AppError> {
        tracing::debug!(sql = %sql, "clickhouse query");
        let started = std::time::Instant::now();
        let body = format!("{} FORMAT JSON", sql);
        let resp = self.request(database).body(body).send().await?;
        crate::adapter::warn_if_slow(sql, started);
        if !resp.status().is_success() {
            return Err(AppError::Backend(resp.text().await.unwrap_or_default()));
        }
        let out: Value = resp.json().await?;
        let rows = out
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter_map(|r| match r {
                Value::Object(m) => Some(m),
                _ => None,
            })
            .collect())
    }

    pub(crate) async fn execute(&self, database: &str, body: String) -> Result<(), AppError> {
        tracing::debug!(sql = %body, "clickhouse execute");
        let resp = self.request(database).body(body).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Backend(resp.text().await.unwrap_or_default()));
        }
        Ok(())
    }
}

fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "\\`"))
}

fn literal(v: &Value) -> String {
    match v {
        Value::Null => "NULL".into(),
        Value::Bool(true) => "1".into(),
        Value::Bool(false) => "0".into(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        other => format!("'{}'", other.to_string().replace('\\', "\\\\").replace('\'', "\\'")),
    }
}

fn soft_delete_clause(table: &TableConfig) -> Option<String> {
    if table.softdel_key.is_empty() {
        return None;
    }
    let key = quote_ident(&table.softdel_key);
    Some(match table.softdel_type {
        Some(SoftDeleteType::Boolean) => format!("{} = 0", key),
        Some(SoftDeleteType::Int) => format!("{} = 0", key),
        _ => format!("{} IS NULL", key),
    })
}

fn condition_clause(cond: &FilterCondition) -> Option<String> {
    let col = quote_ident(&cond.field);
    let raw = cond.raw.as_str();
    Some(match cond.op {
        FilterOp::Eq => format!("{} = {}", col, literal(&parse_filter_value(raw))),
        FilterOp::Ne => format!("{} <> {}", col, literal(&parse_filter_value(raw))),
        FilterOp::Gt => format!("{} > {}", col, literal(&parse_filter_value(raw))),
        FilterOp::Gte => format!("{} >= {}", col, literal(&parse_filter_value(raw))),
        FilterOp::Lt => format!("{} < {}", col, literal(&parse_filter_value(raw))),
        FilterOp::Lte => format!("{} <= {}", col, literal(&parse_filter_value(raw))),
        FilterOp::Like => format!("{} LIKE {}", col, literal(&Value::String(normalize_like_value(raw)))),
        FilterOp::IContains => format!(
            "lower({}) LIKE lower({})",
            col,
            literal(&Value::String(format!("%{}%", normalize_like_value(raw))))
        ),
        FilterOp::In => {
            let values = parse_filter_values(raw);
            if values.is_empty() {
                return None;
            }
            format!(
                "{} IN ({})",
                col,
                values.iter().map(literal).collect::<Vec<_>>().join(", ")
            )
        }
        FilterOp::IsNull => match parse_filter_value(raw) {
            Value::Bool(true) => format!("{} IS NULL", col),
            Value::Bool(false) => format!("{} IS NOT NULL", col),
            _ => return None,
        },
        FilterOp::Between => {
            let values = parse_filter_values(raw);
            if values.len() != 2 {
                return None;
            }
            format!("{} BETWEEN {} AND {}", col, literal(&values[0]), literal(&values[1]))
        }
    })
}

fn where_clause(parts: Vec<String>) -> String {
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

fn eq_map_clauses(filter: &Record) -> Vec<String> {
    filter
        .iter()
        .map(|(k, v)| format!("{} = {}", quote_ident(k), literal(v)))
        .collect()
}

fn count_from(rows: &[Record]) -> i64 {
    rows.first()
        .and_then(|r| r.get("cnt"))
        .and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .unwrap_or(0)
}

pub struct ClickHouseAdapter {
    http: ClickHouseHttp,
    database: String,
}

impl ClickHouseAdapter {
    pub fn connect(db: &DatabaseConfig) -> Result<Self, AppError> {
        Ok(ClickHouseAdapter {
            http: ClickHouseHttp::new(&db.dsn, &db.alias)?,
            database: db.database.clone(),
        })
    }

    fn table_ref(&self, table: &TableConfig) -> String {
        format!("{}.{}", quote_ident(&self.database), quote_ident(&table.name))
    }

    async fn count_where(&self, table: &TableConfig, parts: Vec<String>) -> Result<i64, AppError> {
        let sql = format!(
            "SELECT count() AS cnt FROM {}{}",
            self.table_ref(table),
            where_clause(parts)
        );
        let rows = self.http.query_json(&self.database, &sql).await?;
        Ok(count_from(&rows))
    }

    fn soft_delete_set(&self, table: &TableConfig) -> String {
        let marker = match table.softdel_type {
            Some(SoftDeleteType::Boolean) => Value::Bool(true),
            Some(SoftDeleteType::Int) => Value::from(1),
            _ => Value::String(now_timestamp()),
        };
        format!("{} = {}", quote_ident(&table.softdel_key), literal(&marker))
    }
}

#[async_trait]
impl DatabaseAdapter for ClickHouseAdapter {
    async fn list(&self, table: &TableConfig, params: &ListParams) -> Result<(Vec<Record>, i64), AppError> {
        let mut parts = Vec::new();
        if let Some(clause) = soft_delete_clause(table) {
            parts.push(clause);
        }
        for cond in collect_conditions(&params.filters) {
            if let Some(clause) = condition_clause(&cond) {
                parts.push(clause);
            }
        }
        let total = if params.is_filtered() {
            self.count_where(table, parts.clone()).await?
        } else {
            0
        };
        let columns = if params.fields.is_empty() {
            "*".to_string()
        } else {
            params
                .fields
                .split(',')
                .map(|f| quote_ident(f.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let order = if params.order.is_empty() {
            String::new()
        } else {
            match params.order.strip_prefix('-') {
                Some(f) => format!(" ORDER BY {} DESC", quote_ident(f)),
                None => format!(" ORDER BY {} ASC", quote_ident(&params.order)),
            }
        };
        let sql = format!(
            "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
            columns,
            self.table_ref(table),
            where_clause(parts),
            order,
            params.page_size,
            params.offset(),
        );
        let rows = self.http.query_json(&self.database, &sql).await?;
        Ok((rows, total))
    }

    async fn batch_create(&self, table: &TableConfig, records: Vec<Record>) -> Result<(Vec<Value>, Vec<Record>), AppError> {
        let mut body = format!("INSERT INTO {} FORMAT JSONEachRow\n", self.table_ref(table));
        for record in &records {
            body.push_str(&Value::Object(record.clone()).to_string());
            body.push('\n');
        }
        self.http.execute(&self.database, body).await?;
        Ok((Vec::new(), records))
    }

    async fn batch_update(&self, table: &TableConfig, records: Vec<Record>) -> Result<(i64, i64), AppError> {
        let pk = &table.primary_key;
        let mut n = 0;
        for record in &records {
            let id = record
                .get(pk)
                .ok_or_else(|| AppError::BadRequest(format!("record missing primary key '{}'", pk)))?;
            let mut data = record.clone();
            data.remove(pk);
            if data.is_empty() {
                continue;
            }
            let sets: Vec<String> = data
                .iter()
                .map(|(k, v)| format!("{} = {}", quote_ident(k), literal(v)))
                .collect();
            let sql = format!(
                "ALTER TABLE {} UPDATE {} WHERE {} = {}",
                self.table_ref(table),
                sets.join(", "),
                quote_ident(pk),
                literal(id),
            );
            self.http.execute(&self.database, sql).await?;
            n += 1;
        }
        Ok((n, n))
    }

    async fn batch_delete(&self, table: &TableConfig, ids: Vec<Value>) -> Result<i64, AppError> {
        let pk = quote_ident(&table.primary_key);
        let id_list = ids.iter().map(literal).collect::<Vec<_>>().join(", ");
        let sql = if table.softdel_key.is_empty() {
            format!("ALTER TABLE {} DELETE WHERE {} IN ({})", self.table_ref(table), pk, id_list)
        } else {
            let mut parts = vec![format!("{} IN ({})", pk, id_list)];
            if let Some(clause) = soft_delete_clause(table) {
                parts.insert(0, clause);
            }
            format!(
                "ALTER TABLE {} UPDATE {} WHERE {}",
                self.table_ref(table),
                self.soft_delete_set(table),
                parts.join(" AND "),
            )
        };
        self.http.execute(&self.database, sql).await?;
        Ok(ids.len() as i64)
    }

    async fn get_one(&self, table: &TableConfig, filter: &Record, fields: &str) -> Result<Record, AppError> {
        let mut parts = Vec::new();
        if let Some(clause) = soft_delete_clause(table) {
            parts.push(clause);
        }
        parts.extend(eq_map_clauses(filter));
        let columns = if fields.is_empty() {
            "*".to_string()
        } else {
            fields.split(',').map(|f| quote_ident(f.trim())).collect::<Vec<_>>().join(", ")
        };
        let sql = format!(
            "SELECT {} FROM {}{} LIMIT 1",
            columns,
            self.table_ref(table),
            where_clause(parts)
        );
        let rows = self.http.query_json(&self.database, &sql).await?;
        rows.into_iter().next().ok_or_else(AppError::record_not_found)
    }

    async fn update_one(&self, table: &TableConfig, filter: &Record, data: Record) -> Result<(i64, i64), AppError> {
        let mut parts = Vec::new();
        if let Some(clause) = soft_delete_clause(table) {
            parts.push(clause);
        }
        parts.extend(eq_map_clauses(filter));
        let matched = self.count_where(table, parts.clone()).await?;
        if matched == 0 {
            let exists = self.count_where(table, eq_map_clauses(filter)).await?;
            if exists == 0 {
                return Err(AppError::record_not_found());
            }
            return Ok((0, 0));
        }
        let sets: Vec<String> = data
            .iter()
            .map(|(k, v)| format!("{} = {}", quote_ident(k), literal(v)))
            .collect();
        let sql = format!(
            "ALTER TABLE {} UPDATE {}{}",
            self.table_ref(table),
            sets.join(", "),
            where_clause(parts),
        );
        self.http.execute(&self.database, sql).await?;
        Ok((matched, matched))
    }

    async fn delete_one(&self, table: &TableConfig, filter: &Record) -> Result<i64, AppError> {
        let mut parts = Vec::new();
        if let Some(clause) = soft_delete_clause(table) {
            parts.push(clause);
        }
        parts.extend(eq_map_clauses(filter));
        let matched = self.count_where(table, parts.clone()).await?;
        if matched == 0 {
            let exists = self.count_where(table, eq_map_clauses(filter)).await?;
            if exists == 0 {
                return Err(AppError::record_not_found());
            }
            return Ok(0);
        }
        let sql = if table.softdel_key.is_empty() {
            format!("ALTER TABLE {} DELETE{}", self.table_ref(table), where_clause(parts))
        } else {
            format!(
                "ALTER TABLE {} UPDATE {}{}",
                self.table_ref(table),
                self.soft_delete_set(table),
                where_clause(parts),
            )
        };
        self.http.execute(&self.database, sql).await?;
        Ok(matched)
    }

    async fn count_all(&self, table: &TableConfig) -> Result<i64, AppError> {
        let parts = soft_delete_clause(table).into_iter().collect();
        self.count_where(table, parts).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.http.query_json(&self.database, "SELECT 1 AS cnt").await.map(|_| ())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literals_escape_quotes() {
        assert_eq!(literal(&json!("o'brien")), "'o\\'brien'");
        assert_eq!(literal(&json!(5)), "5");
        assert_eq!(literal(&json!(true)), "1");
        assert_eq!(literal(&Value::Null), "NULL");
    }

    #[test]
    fn conditions_render_inline() {
        let cond = FilterCondition {
            field: "age".into(),
            op: FilterOp::Between,
            raw: "2,10".into(),
        };
        assert_eq!(condition_clause(&cond).unwrap(), "`age` BETWEEN 2 AND 10");
        let cond = FilterCondition {
            field: "name".into(),
            op: FilterOp::In,
            raw: "a,b".into(),
        };
        assert_eq!(condition_clause(&cond).unwrap(), "`name` IN ('a', 'b')");
    }

    #[test]
    fn count_parses_number_or_string() {
        let mut row = Record::new();
        row.insert("cnt".into(), json!(9));
        assert_eq!(count_from(&[row.clone()]), 9);
        row.insert("cnt".into(), json!("12"));
        assert_eq!(count_from(&[row]), 12);
        assert_eq!(count_from(&[]), 0);
    }
}
