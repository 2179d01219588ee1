//! End-to-end REST scenarios over an in-memory SQLite database, driven
//! through the router the way a client would.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use datagate::adapter::sql::SqlAdapter;
use datagate::config::{
    BaseConfig, DatabaseConfig, DbKind, DefaultValue, GatewayConfig, SoftDeleteType, TableConfig,
};
use datagate::rest::rest_routes;
use datagate::state::AppState;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tower::ServiceExt;

async fn build_gateway() -> (Router, AppState, tempfile::TempDir) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE user (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            age INTEGER NOT NULL,
            created_at DATETIME,
            deleted_at DATETIME
        )",
    )
    .execute(&pool)
    .await
    .unwrap();

    let mut table = TableConfig {
        name: "user".into(),
        alias: "user".into(),
        primary_key: "id".into(),
        unique_keys: vec![vec!["email".into()]],
        softdel_key: "deleted_at".into(),
        softdel_type: Some(SoftDeleteType::Timestamp),
        ..TableConfig::default()
    };
    table.default_values.insert("created_at".into(), DefaultValue::Now);

    let db = DatabaseConfig {
        kind: DbKind::Sqlite,
        dsn: "sqlite::memory:".into(),
        database: "test".into(),
        alias: "test".into(),
        pool: Default::default(),
        tables: vec![table],
    };
    let mut config = GatewayConfig {
        base: BaseConfig::default(),
        databases: Default::default(),
    };
    config.databases.insert("test".into(), db);

    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(config, dir.path().to_path_buf(), "http://localhost:0".into());
    state.insert_adapter("test", Arc::new(SqlAdapter::from_sqlite_pool(pool)));
    let router = rest_routes(state.clone(), "/api/rest");
    (router, state, dir)
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn seed_users(router: &Router) -> Value {
    let body = json!([
        { "username": "alice", "email": "a@x", "age": 1 },
        { "username": "bob", "email": "b@x", "age": 14 },
        { "username": "carol", "email": "c@x", "age": 5 },
        { "username": "dave", "email": "d@x", "age": 10 }
    ]);
    let (status, created) = send(router, with_json("POST", "/api/rest/test/user", &body)).await;
    assert_eq!(status, StatusCode::CREATED);
    created
}

#[tokio::test]
async fn batch_create_assigns_ids_and_defaults() {
    let (router, _state, _dir) = build_gateway().await;
    let created = seed_users(&router).await;
    let rows = created.as_array().unwrap();
    assert_eq!(rows.len(), 4);
    // auto-increment keys come back as decimal strings
    assert_eq!(rows[0]["id"], json!("1"));
    assert_eq!(rows[1]["id"], json!("2"));
    // the {{now}} default filled created_at
    assert!(rows[0]["created_at"].as_str().map(|s| !s.is_empty()).unwrap_or(false));
}

#[tokio::test]
async fn list_pagination_and_cached_total() {
    let (router, state, _dir) = build_gateway().await;
    seed_users(&router).await;
    state.counts.set("test", "user", 4);

    let (status, out) = send(&router, get("/api/rest/test/user?page=1&page_size=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["data"].as_array().unwrap().len(), 2);
    assert_eq!(out["total"], json!(4));

    let (_, page2) = send(&router, get("/api/rest/test/user?page=2&page_size=2")).await;
    assert_eq!(page2["data"].as_array().unwrap().len(), 2);
    assert_ne!(out["data"][0]["id"], page2["data"][0]["id"]);
}

#[tokio::test]
async fn filters_and_ordering() {
    let (router, _state, _dir) = build_gateway().await;
    seed_users(&router).await;

    let (status, out) = send(&router, get("/api/rest/test/user?username__in=alice,bob")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["data"].as_array().unwrap().len(), 2);
    // filtered requests compute their own total
    assert_eq!(out["total"], json!(2));

    let (status, out) = send(&router, get("/api/rest/test/user?age__between=2,10&order=-age")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["data"][0]["age"], json!(10));
    assert_eq!(out["data"].as_array().unwrap().len(), 2);

    let (_, out) = send(&router, get("/api/rest/test/user?age__gte=14&age__lte=14")).await;
    assert_eq!(out["data"].as_array().unwrap().len(), 1);
    assert_eq!(out["data"][0]["username"], json!("bob"));

    let (_, out) = send(&router, get("/api/rest/test/user?email__like=%25@x")).await;
    assert_eq!(out["data"].as_array().unwrap().len(), 4);

    let (_, out) = send(&router, get("/api/rest/test/user?username__icontains=ALI")).await;
    assert_eq!(out["data"].as_array().unwrap().len(), 1);

    let (_, out) = send(&router, get("/api/rest/test/user?fields=id,username&page_size=1")).await;
    let row = out["data"][0].as_object().unwrap();
    assert_eq!(row.len(), 2);
    assert!(row.contains_key("username"));
}

#[tokio::test]
async fn unique_key_lookup() {
    let (router, _state, _dir) = build_gateway().await;
    seed_users(&router).await;

    let (status, record) = send(&router, get("/api/rest/test/user/b@x?key=email")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["email"], json!("b@x"));
    assert_eq!(record["username"], json!("bob"));

    let (status, _) = send(&router, get("/api/rest/test/user/not_exist?key=email")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // username is not a configured unique key
    let (status, body) = send(&router, get("/api/rest/test/user/alice?key=username")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("unique key"));
}

#[tokio::test]
async fn get_update_delete_by_id() {
    let (router, _state, _dir) = build_gateway().await;
    seed_users(&router).await;

    let (status, record) = send(&router, get("/api/rest/test/user/2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["username"], json!("bob"));

    let (status, out) = send(&router, with_json("PUT", "/api/rest/test/user/2", &json!({ "age": 15 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["matched_count"], json!(1));
    let (_, record) = send(&router, get("/api/rest/test/user/2")).await;
    assert_eq!(record["age"], json!(15));

    let (status, out) = send(&router, Request::builder().method("DELETE").uri("/api/rest/test/user/2").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["deleted_count"], json!(1));

    // soft-deleted rows are invisible to reads and excluded from lists
    let (status, _) = send(&router, get("/api/rest/test/user/2")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, out) = send(&router, get("/api/rest/test/user?email=b@x")).await;
    assert_eq!(out["data"].as_array().unwrap().len(), 0);
    assert_eq!(out["total"], json!(0));

    // deleting again is a no-op, not an error
    let (status, out) = send(&router, Request::builder().method("DELETE").uri("/api/rest/test/user/2").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["deleted_count"], json!(0));
}

#[tokio::test]
async fn batch_update_semantics() {
    let (router, _state, _dir) = build_gateway().await;
    seed_users(&router).await;

    let (status, out) = send(
        &router,
        with_json(
            "PUT",
            "/api/rest/test/user",
            &json!([ { "id": 1, "age": 2 }, { "id": 3, "age": 6 } ]),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["matched_count"], json!(2));

    // a row without the primary key rejects the whole batch
    let (status, body) = send(
        &router,
        with_json("PUT", "/api/rest/test/user", &json!([ { "email": "x@x" } ])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("primary key"));

    let (status, _) = send(&router, with_json("PUT", "/api/rest/test/user", &json!([]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_delete_semantics() {
    let (router, _state, _dir) = build_gateway().await;
    seed_users(&router).await;

    let (status, _) = send(&router, with_json("POST", "/api/rest/test/user/batch_delete", &json!([]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, out) = send(
        &router,
        with_json("POST", "/api/rest/test/user/batch_delete", &json!(["1", "3"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["deleted_count"], json!(2));

    // object-shaped payloads carry the primary key per row
    let (status, out) = send(
        &router,
        with_json("POST", "/api/rest/test/user/batch_delete", &json!([{ "id": 4 }])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["deleted_count"], json!(1));

    let (_, out) = send(&router, get("/api/rest/test/user?age__gte=0")).await;
    assert_eq!(out["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_routes_and_empty_create() {
    let (router, _state, _dir) = build_gateway().await;

    let (status, _) = send(&router, get("/api/rest/test/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&router, get("/api/rest/nope/user")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, with_json("POST", "/api/rest/test/user", &json!([]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
