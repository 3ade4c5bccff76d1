//! Establishment listing routes.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use domain::models::{Establishment, ListEstablishmentsQuery, ListEstablishmentsResponse};
use persistence::repositories::EstablishmentRepository;

use super::sites::require_site;
use crate::app::AppState;
use crate::error::ApiError;

/// GET /api/v1/sites/:site_id/establishments
///
/// Query: `active`, `postal_code`, `limit` (default 100, max 500), `offset`.
pub async fn list_establishments(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
    Query(query): Query<ListEstablishmentsQuery>,
) -> Result<Json<ListEstablishmentsResponse>, ApiError> {
    require_site(&state, site_id).await?;

    let (rows, total) = EstablishmentRepository::new(state.pool.clone())
        .list_for_site(site_id, &query)
        .await?;

    Ok(Json(ListEstablishmentsResponse {
        establishments: rows.into_iter().map(Establishment::from).collect(),
        total,
    }))
}
