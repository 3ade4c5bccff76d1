//! Site management routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use domain::models::{ListSitesResponse, RegistryFilters, Site, UpsertSiteRequest};
use persistence::repositories::{SiteInput, SiteRepository};
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;

/// Trims filter values and drops the blank ones.
fn clean_filters(filters: Option<&RegistryFilters>) -> RegistryFilters {
    filters
        .map(|f| {
            f.iter()
                .map(|(k, v)| (k.clone(), v.trim().to_string()))
                .filter(|(_, v)| !v.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn site_input<'a>(request: &'a UpsertSiteRequest, filters: &'a RegistryFilters) -> SiteInput<'a> {
    SiteInput {
        name: request.name.trim(),
        slug: &request.slug,
        description: request.description.as_deref(),
        sirene_filters: filters,
    }
}

/// Load a site or answer 404.
pub(crate) async fn require_site(state: &AppState, site_id: i64) -> Result<Site, ApiError> {
    SiteRepository::new(state.pool.clone())
        .find_by_id(site_id)
        .await?
        .map(Site::from)
        .ok_or_else(|| ApiError::NotFound(format!("Site {} not found", site_id)))
}

/// POST /api/v1/sites
pub async fn create_site(
    State(state): State<AppState>,
    Json(request): Json<UpsertSiteRequest>,
) -> Result<(StatusCode, Json<Site>), ApiError> {
    request.validate()?;

    let filters = clean_filters(request.sirene_filters.as_ref());
    let site: Site = SiteRepository::new(state.pool.clone())
        .create(site_input(&request, &filters))
        .await?
        .into();

    info!(site_id = site.id, slug = %site.slug, "Site created");
    Ok((StatusCode::CREATED, Json(site)))
}

/// GET /api/v1/sites
pub async fn list_sites(
    State(state): State<AppState>,
) -> Result<Json<ListSitesResponse>, ApiError> {
    let sites: Vec<Site> = SiteRepository::new(state.pool.clone())
        .list()
        .await?
        .into_iter()
        .map(Site::from)
        .collect();

    let total = sites.len();
    Ok(Json(ListSitesResponse { sites, total }))
}

/// GET /api/v1/sites/:site_id
pub async fn get_site(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
) -> Result<Json<Site>, ApiError> {
    Ok(Json(require_site(&state, site_id).await?))
}

/// PUT /api/v1/sites/:site_id
///
/// Replaces every field, including the filter map.
pub async fn update_site(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
    Json(request): Json<UpsertSiteRequest>,
) -> Result<Json<Site>, ApiError> {
    request.validate()?;

    let filters = clean_filters(request.sirene_filters.as_ref());
    let site: Site = SiteRepository::new(state.pool.clone())
        .update(site_id, site_input(&request, &filters))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Site {} not found", site_id)))?
        .into();

    info!(site_id = site.id, "Site updated");
    Ok(Json(site))
}

/// DELETE /api/v1/sites/:site_id
///
/// Removes the site's import jobs and establishments as well.
pub async fn delete_site(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let deleted = SiteRepository::new(state.pool.clone())
        .delete(site_id)
        .await?;

    if !deleted {
        return Err(ApiError::NotFound(format!("Site {} not found", site_id)));
    }

    info!(site_id = site_id, "Site deleted");
    Ok(StatusCode::NO_CONTENT)
}
