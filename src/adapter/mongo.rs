//! MongoDB adapter. Filters translate to operator documents, `__like`
//! becomes an anchored case-insensitive regex, and a 24-hex `_id` coerces to
//! a native ObjectId.

use crate::adapter::filter::{
    collect_conditions, normalize_like_value, parse_filter_value, parse_filter_values, FilterCondition, FilterOp,
};
use crate::adapter::{DatabaseAdapter, ListParams, Record};
use crate::config::{DatabaseConfig, SoftDeleteType, TableConfig};
use crate::error::AppError;
use crate::idgen::now_timestamp;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures_util::TryStreamExt;
use mongodb::options::ClientOptions;
use mongodb::Client;
use serde_json::Value;

pub(crate) fn json_to_bson(v: &Value) -> Bson {
    match v {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else {
                Bson::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => {
            let mut d = Document::new();
            for (k, v) in map {
                d.insert(k.clone(), json_to_bson(v));
            }
            Bson::Document(d)
        }
    }
}

pub(crate) fn bson_to_json(b: &Bson) -> Value {
    match b {
        Bson::Null => Value::Null,
        Bson::Boolean(v) => Value::Bool(*v),
        Bson::Int32(v) => Value::from(*v),
        Bson::Int64(v) => Value::from(*v),
        Bson::Double(v) => Value::from(*v),
        Bson::String(v) => Value::String(v.clone()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(
            dt.to_chrono().naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        ),
        Bson::Decimal128(d) => Value::String(d.to_string()),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(d) => Value::Object(doc_to_record(d)),
        Bson::Timestamp(ts) => Value::from(ts.time),
        other => Value::String(other.to_string()),
    }
}

pub(crate) fn doc_to_record(doc: &Document) -> Record {
    doc.iter().map(|(k, v)| (k.clone(), bson_to_json(v))).collect()
}

pub(crate) fn record_to_doc(record: &Record) -> Document {
    let mut doc = Document::new();
    for (k, v) in record {
        doc.insert(k.clone(), json_to_bson(v));
    }
    doc
}

/// A 24-character hex string in the `_id` position becomes a native
/// ObjectId before it reaches the driver.
pub(crate) fn coerce_pk(pk: &str, v: &Value) -> Bson {
    if pk == "_id" {
        if let Value::String(s) = v {
            if s.len() == 24 {
                if let Ok(oid) = bson::oid::ObjectId::parse_str(s) {
                    return Bson::ObjectId(oid);
                }
            }
        }
    }
    json_to_bson(v)
}

fn apply_soft_delete(filter: &mut Document, table: &TableConfig) {
    if table.softdel_key.is_empty() {
        return;
    }
    let key = table.softdel_key.as_str();
    match table.softdel_type {
        Some(SoftDeleteType::Boolean) => {
            filter.insert(key, false);
        }
        Some(SoftDeleteType::Int) => {
            filter.insert(key, 0i64);
        }
        _ => {
            filter.insert(
                "$or",
                vec![
                    doc! { key: { "$exists": false } },
                    doc! { key: Bson::Null },
                    doc! { key: "" },
                ],
            );
        }
    }
}

/// SQL wildcards to a regex: `%` spans, `_` is one char; anchor when
/// neither end carries a wildcard.
pub(crate) fn like_to_regex(value: &str) -> String {
    let mut pattern = regex::escape(value).replace('%', ".*").replace('_', ".");
    if !pattern.starts_with(".*") {
        pattern = format!("^{}", pattern);
    }
    if !pattern.ends_with(".*") {
        pattern = format!("{}$", pattern);
    }
    pattern
}

fn condition_to_bson(filter: &mut Document, cond: &FilterCondition) {
    let raw = cond.raw.as_str();
    let field = cond.field.as_str();
    match cond.op {
        FilterOp::Eq => {
            filter.insert(field, json_to_bson(&parse_filter_value(raw)));
        }
        FilterOp::Ne => {
            filter.insert(field, doc! { "$ne": json_to_bson(&parse_filter_value(raw)) });
        }
        FilterOp::Gt => {
            filter.insert(field, doc! { "$gt": json_to_bson(&parse_filter_value(raw)) });
        }
        FilterOp::Gte => {
            filter.insert(field, doc! { "$gte": json_to_bson(&parse_filter_value(raw)) });
        }
        FilterOp::Lt => {
            filter.insert(field, doc! { "$lt": json_to_bson(&parse_filter_value(raw)) });
        }
        FilterOp::Lte => {
            filter.insert(field, doc! { "$lte": json_to_bson(&parse_filter_value(raw)) });
        }
        FilterOp::Like => {
            filter.insert(
                field,
                doc! { "$regex": like_to_regex(&normalize_like_value(raw)), "$options": "i" },
            );
        }
        FilterOp::IContains => {
            filter.insert(field, doc! { "$regex": raw, "$options": "i" });
        }
        FilterOp::In => {
            let values: Vec<Bson> = parse_filter_values(raw).iter().map(json_to_bson).collect();
            filter.insert(field, doc! { "$in": values });
        }
        FilterOp::IsNull => match parse_filter_value(raw) {
            Value::Bool(true) => {
                filter.insert(field, doc! { "$exists": false });
            }
            Value::Bool(false) => {
                filter.insert(field, doc! { "$exists": true });
            }
            _ => {}
        },
        FilterOp::Between => {
            let values = parse_filter_values(raw);
            if values.len() == 2 {
                filter.insert(
                    field,
                    doc! { "$gte": json_to_bson(&values[0]), "$lte": json_to_bson(&values[1]) },
                );
            }
        }
    }
}

/// `order=a,-b` sorts multi-key on the document backend.
fn sort_doc(order: &str) -> Document {
    let mut sort = Document::new();
    for field in order.split(',') {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        match field.strip_prefix('-') {
            Some(f) => sort.insert(f, -1i32),
            None => sort.insert(field, 1i32),
        };
    }
    sort
}

fn projection_doc(fields: &str) -> Document {
    let mut proj = Document::new();
    for field in fields.split(',') {
        let field = field.trim();
        if !field.is_empty() {
            proj.insert(field, 1i32);
        }
    }
    proj
}

fn filter_to_doc(filter: &Record) -> Document {
    let mut doc = Document::new();
    for (k, v) in filter {
        doc.insert(k.clone(), coerce_pk(k, v));
    }
    doc
}

fn soft_delete_marker(table: &TableConfig) -> Bson {
    match table.softdel_type {
        Some(SoftDeleteType::Boolean) => Bson::Boolean(true),
        Some(SoftDeleteType::Int) => Bson::Int64(1),
        _ => Bson::String(now_timestamp()),
    }
}

pub struct MongoAdapter {
    client: Client,
    database: String,
}

impl MongoAdapter {
    pub async fn connect(db: &DatabaseConfig) -> Result<Self, AppError> {
        let mut opts = ClientOptions::parse(&db.dsn).await?;
        if db.pool.max_open_conns > 0 {
            opts.max_pool_size = Some(db.pool.max_open_conns);
        }
        if db.pool.max_idle_time > 0 {
            opts.max_idle_time = Some(std::time::Duration::from_secs(db.pool.max_idle_time));
        }
        let client = Client::with_options(opts)?;
        Ok(MongoAdapter {
            client,
            database: db.database.clone(),
        })
    }

    fn collection(&self, table: &TableConfig) -> mongodb::Collection<Document> {
        self.client.database(&self.database).collection(&table.name)
    }
}

#[async_trait]
impl DatabaseAdapter for MongoAdapter {
    async fn list(&self, table: &TableConfig, params: &ListParams) -> Result<(Vec<Record>, i64), AppError> {
        let collection = self.collection(table);
        let mut filter = Document::new();
        apply_soft_delete(&mut filter, table);
        for cond in collect_conditions(&params.filters) {
            condition_to_bson(&mut filter, &cond);
        }
        tracing::debug!(filter = %filter, order = %params.order, "find");

        let mut find = collection
            .find(filter.clone())
            .skip(params.offset().max(0) as u64)
            .limit(params.page_size);
        if !params.order.is_empty() {
            find = find.sort(sort_doc(&params.order));
        }
        if !params.fields.is_empty() {
            find = find.projection(projection_doc(&params.fields));
        }
        let docs: Vec<Document> = find.await?.try_collect().await?;
        let rows = docs.iter().map(doc_to_record).collect();

        let total = if params.is_filtered() {
            collection.count_documents(filter).await? as i64
        } else {
            0
        };
        Ok((rows, total))
    }

    async fn batch_create(&self, table: &TableConfig, records: Vec<Record>) -> Result<(Vec<Value>, Vec<Record>), AppError> {
        let collection = self.collection(table);
        let docs: Vec<Document> = records.iter().map(record_to_doc).collect();
        let result = collection.insert_many(docs).await?;
        let mut ids = Vec::with_capacity(records.len());
        for i in 0..records.len() {
            ids.push(result.inserted_ids.get(&i).map(bson_to_json).unwrap_or(Value::Null));
        }
        Ok((ids, records))
    }

    async fn batch_update(&self, table: &TableConfig, records: Vec<Record>) -> Result<(i64, i64), AppError> {
        let collection = self.collection(table);
        let pk = &table.primary_key;
        let mut matched = 0i64;
        let mut modified = 0i64;
        for record in &records {
            let id = record
                .get(pk)
                .ok_or_else(|| AppError::BadRequest(format!("record missing primary key '{}'", pk)))?;
            let mut data = record.clone();
            data.remove(pk);
            if data.is_empty() {
                continue;
            }
            let filter = doc! { pk.as_str(): coerce_pk(pk, id) };
            let update = doc! { "$set": record_to_doc(&data) };
            let result = collection.update_one(filter, update).await?;
            matched += result.matched_count as i64;
            modified += result.modified_count as i64;
        }
        Ok((matched, modified))
    }

    async fn batch_delete(&self, table: &TableConfig, ids: Vec<Value>) -> Result<i64, AppError> {
        let collection = self.collection(table);
        let pk = &table.primary_key;
        let converted: Vec<Bson> = ids.iter().map(|id| coerce_pk(pk, id)).collect();
        let mut filter = doc! { pk.as_str(): { "$in": converted } };
        if table.softdel_key.is_empty() {
            let result = collection.delete_many(filter).await?;
            return Ok(result.deleted_count as i64);
        }
        apply_soft_delete(&mut filter, table);
        let update = doc! { "$set": { table.softdel_key.as_str(): soft_delete_marker(table) } };
        let result = collection.update_many(filter, update).await?;
        Ok(result.modified_count as i64)
    }

    async fn get_one(&self, table: &TableConfig, filter: &Record, fields: &str) -> Result<Record, AppError> {
        let collection = self.collection(table);
        let mut filter_doc = filter_to_doc(filter);
        apply_soft_delete(&mut filter_doc, table);
        let mut find = collection.find_one(filter_doc);
        if !fields.is_empty() {
            find = find.projection(projection_doc(fields));
        }
        let doc = find.await?.ok_or_else(AppError::record_not_found)?;
        Ok(doc_to_record(&doc))
    }

    async fn update_one(&self, table: &TableConfig, filter: &Record, data: Record) -> Result<(i64, i64), AppError> {
        let collection = self.collection(table);
        let raw_filter = filter_to_doc(filter);
        let mut filter_doc = raw_filter.clone();
        apply_soft_delete(&mut filter_doc, table);
        let update = doc! { "$set": record_to_doc(&data) };
        let result = collection.update_one(filter_doc, update).await?;
        if result.matched_count == 0 {
            let exists = collection.count_documents(raw_filter).await?;
            if exists == 0 {
                return Err(AppError::record_not_found());
            }
        }
        Ok((result.matched_count as i64, result.modified_count as i64))
    }

    async fn delete_one(&self, table: &TableConfig, filter: &Record) -> Result<i64, AppError> {
        let collection = self.collection(table);
        let raw_filter = filter_to_doc(filter);
        let affected = if table.softdel_key.is_empty() {
            collection.delete_one(raw_filter.clone()).await?.deleted_count
        } else {
            let mut filter_doc = raw_filter.clone();
            apply_soft_delete(&mut filter_doc, table);
            let update = doc! { "$set": { table.softdel_key.as_str(): soft_delete_marker(table) } };
            collection.update_one(filter_doc, update).await?.modified_count
        };
        if affected == 0 {
            let exists = collection.count_documents(raw_filter).await?;
            if exists == 0 {
                return Err(AppError::record_not_found());
            }
        }
        Ok(affected as i64)
    }

    async fn count_all(&self, table: &TableConfig) -> Result<i64, AppError> {
        let collection = self.collection(table);
        let mut filter = Document::new();
        apply_soft_delete(&mut filter, table);
        Ok(collection.count_documents(filter).await? as i64)
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn like_regex_translation() {
        assert_eq!(like_to_regex("%gmail.com"), ".*gmail\\.com$");
        assert_eq!(like_to_regex("al_ce"), "^al.ce$");
        assert_eq!(like_to_regex("a%"), "^a.*");
        assert_eq!(like_to_regex("plain"), "^plain$");
    }

    #[test]
    fn object_id_coercion_needs_24_hex() {
        let oid = coerce_pk("_id", &json!("507f1f77bcf86cd799439011"));
        assert!(matches!(oid, Bson::ObjectId(_)));
        let not_oid = coerce_pk("_id", &json!("short"));
        assert!(matches!(not_oid, Bson::String(_)));
        let other_key = coerce_pk("id", &json!("507f1f77bcf86cd799439011"));
        assert!(matches!(other_key, Bson::String(_)));
    }

    #[test]
    fn soft_delete_filter_shapes() {
        let mut table = TableConfig {
            softdel_key: "deleted_at".into(),
            softdel_type: Some(SoftDeleteType::Timestamp),
            ..TableConfig::default()
        };
        let mut f = Document::new();
        apply_soft_delete(&mut f, &table);
        assert!(f.contains_key("$or"));

        table.softdel_type = Some(SoftDeleteType::Int);
        let mut f = Document::new();
        apply_soft_delete(&mut f, &table);
        assert_eq!(f.get_i64("deleted_at").unwrap(), 0);
    }

    #[test]
    fn between_condition_builds_range() {
        let mut f = Document::new();
        condition_to_bson(
            &mut f,
            &FilterCondition {
                field: "age".into(),
                op: FilterOp::Between,
                raw: "2,10".into(),
            },
        );
        let range = f.get_document("age").unwrap();
        assert_eq!(range.get_i64("$gte").unwrap(), 2);
        assert_eq!(range.get_i64("$lte").unwrap(), 10);
    }

    #[test]
    fn sort_doc_multi_key() {
        let sort = sort_doc("age,-id");
        assert_eq!(sort.get_i32("age").unwrap(), 1);
        assert_eq!(sort.get_i32("id").unwrap(), -1);
    }

    #[test]
    fn roundtrip_json_bson() {
        let v = json!({"a": 1, "b": [true, "x"], "c": {"d": 1.5}});
        let b = json_to_bson(&v);
        assert_eq!(bson_to_json(&b), v);
    }
}
