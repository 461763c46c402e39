use axum::extract::{Query, State};
use axum::response::Json;

use lestash_protocol::{ChangesQuery, ChangesResponse, HealthResponse, StatusResponse};

use crate::error::ServerResult;
use crate::router::AppState;

/// Health check handler.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// `GET /sync/status`: identity, version and protocol descriptor.
pub async fn status_handler(State(state): State<AppState>) -> ServerResult<Json<StatusResponse>> {
    let (site_id, db_version) = state.store.identity()?;
    Ok(Json(StatusResponse::new(site_id, db_version, &state.store.descriptor())))
}

/// `GET /sync/changes?since=N`: every change with a database version above `N`.
pub async fn changes_handler(
    State(state): State<AppState>,
    Query(query): Query<ChangesQuery>,
) -> ServerResult<Json<ChangesResponse>> {
    query.validate()?;
    let snapshot = state.store.snapshot_since(query.since)?;
    tracing::debug!(
        since = query.since,
        db_version = snapshot.db_version,
        changes = snapshot.changes.len(),
        "serving changes"
    );
    Ok(Json(ChangesResponse::new(
        snapshot.site_id,
        snapshot.db_version,
        query.since,
        snapshot.changes,
    )))
}
