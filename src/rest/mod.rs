//! REST route table for the gateway surface.

pub mod handlers;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

/// CRUD routes under the configurable prefix, plus the generated OpenAPI
/// document at `/swagger/:db_alias/swagger.yaml`.
pub fn rest_routes(state: AppState, prefix: &str) -> Router {
    Router::new()
        .route(
            &format!("{}/:database/:table", prefix),
            get(handlers::list)
                .post(handlers::batch_create)
                .put(handlers::batch_update),
        )
        .route(
            &format!("{}/:database/:table/batch_delete", prefix),
            post(handlers::batch_delete),
        )
        .route(
            &format!("{}/:database/:table/:id", prefix),
            get(handlers::get_one)
                .put(handlers::update_one)
                .delete(handlers::delete_one),
        )
        .route("/swagger/:database/swagger.yaml", get(handlers::swagger_yaml))
        .with_state(state)
}
