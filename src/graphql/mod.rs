//! GraphQL surface: one schema per database, projected from the generated
//! swagger documents, served at `/api/graphql/:db_alias`.

pub mod projector;
pub mod resolvers;

use crate::state::AppState;
use async_graphql::dynamic::Schema;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::{Path, State};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct SchemaRegistry {
    schemas: Arc<HashMap<String, Schema>>,
}

/// Project every database's generated swagger document; a database whose
/// document is missing or malformed is skipped with a warning.
pub fn build_schemas(state: &AppState) -> SchemaRegistry {
    let mut schemas = HashMap::new();
    for (alias, db) in &state.config.databases {
        let path = state.cfg_dir.join("table").join(&db.database).join("swagger.yaml");
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(db = %alias, error = %e, "swagger.yaml not readable, no graphql schema");
                continue;
            }
        };
        match projector::schema_from_swagger(&text, &state.rest_base_url) {
            Ok(schema) => {
                schemas.insert(alias.clone(), schema);
            }
            Err(e) => {
                tracing::warn!(db = %alias, error = %e, "graphql schema build failed");
            }
        }
    }
    SchemaRegistry {
        schemas: Arc::new(schemas),
    }
}

async fn graphql_handler(
    State(registry): State<SchemaRegistry>,
    Path(db_alias): Path<String>,
    req: GraphQLRequest,
) -> GraphQLResponse {
    match registry.schemas.get(&db_alias) {
        Some(schema) => schema.execute(req.into_inner()).await.into(),
        None => async_graphql::Response::from_errors(vec![async_graphql::ServerError::new(
            format!("no graphql schema for database {}", db_alias),
            None,
        )])
        .into(),
    }
}

pub fn graphql_routes(registry: SchemaRegistry) -> Router {
    Router::new()
        .route("/api/graphql/:database", get(graphql_handler).post(graphql_handler))
        .with_state(registry)
}
