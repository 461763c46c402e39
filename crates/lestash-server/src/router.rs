use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use lestash_protocol::endpoints;
use lestash_store::ChangeLogStore;

use crate::handler;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChangeLogStore>,
}

/// Build the axum router with the read-only sync endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::HEALTH, get(handler::health_handler))
        .route(endpoints::STATUS, get(handler::status_handler))
        .route(endpoints::CHANGES, get(handler::changes_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
