//! datagate: configuration-driven REST + GraphQL gateway over relational
//! and document databases.
//!
//! Startup pipeline: introspect every enabled database, materialize the
//! per-table YAML configs and per-database OpenAPI documents, load them,
//! connect one adapter per database, then serve the REST surface and the
//! GraphQL projection on top of it.

pub mod adapter;
pub mod config;
pub mod counts;
pub mod error;
pub mod graphql;
pub mod idgen;
pub mod meta;
pub mod rest;
pub mod state;

pub use config::{load_config, GatewayConfig};
pub use counts::spawn_refresher;
pub use error::{AppError, ConfigError};
pub use graphql::{build_schemas, graphql_routes};
pub use meta::emit::materialize;
pub use rest::rest_routes;
pub use state::AppState;

use std::path::Path;

pub const DEFAULT_REST_PREFIX: &str = "/api/rest";

/// Load the materialized config and connect every database. A database that
/// fails to connect or answer the startup ping is logged and left out; the
/// rest of the gateway still comes up.
pub async fn build_state(cfg_dir: &Path, port: u16) -> Result<AppState, ConfigError> {
    let config = load_config(cfg_dir)?;
    idgen::init_snowflake(config.base.snowflake_node_id)?;
    adapter::set_slow_query_threshold(config.base.db_log.slow_threshold_ms);
    let state = AppState::new(
        config,
        cfg_dir.to_path_buf(),
        format!("http://localhost:{}", port),
    );
    let aliases: Vec<String> = state.config.databases.keys().cloned().collect();
    for alias in aliases {
        let db = &state.config.databases[&alias];
        match adapter::connect(db).await {
            Ok(adapter) => {
                tracing::info!(db = %alias, kind = db.kind.as_str(), "database connected");
                state.insert_adapter(&alias, adapter);
            }
            Err(e) => {
                tracing::error!(db = %alias, error = %e, "database unavailable, skipping");
            }
        }
    }
    Ok(state)
}

/// The full HTTP surface: REST routes under `prefix`, the swagger document
/// route, and one GraphQL endpoint per database.
pub fn build_router(state: AppState, prefix: &str) -> axum::Router {
    let registry = build_schemas(&state);
    axum::Router::new()
        .merge(rest_routes(state, prefix))
        .merge(graphql_routes(registry))
}
