//! Import job routes.
//!
//! Creating or resuming a job answers immediately; the run itself happens on
//! a background task and is observed through `GET .../imports/:job_id`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use domain::models::{CreateImportJobRequest, ImportJob, ListImportJobsResponse};
use persistence::repositories::ImportJobRepository;
use tracing::info;
use validator::Validate;

use super::sites::require_site;
use crate::app::AppState;
use crate::error::ApiError;
use crate::services::ImportRunner;

fn runner(state: &AppState) -> Result<&ImportRunner, ApiError> {
    state.imports.as_ref().ok_or_else(|| {
        ApiError::ServiceUnavailable(
            "SIRENE registry access is not configured on this server".to_string(),
        )
    })
}

async fn require_job(state: &AppState, site_id: i64, job_id: i64) -> Result<ImportJob, ApiError> {
    ImportJobRepository::new(state.pool.clone())
        .find_for_site(site_id, job_id)
        .await?
        .map(ImportJob::from)
        .ok_or_else(|| {
            ApiError::NotFound(format!("Import job {} not found for site {}", job_id, site_id))
        })
}

/// POST /api/v1/sites/:site_id/imports
///
/// Creates a `pending` job and starts it in the background.
pub async fn create_import_job(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
    Json(request): Json<CreateImportJobRequest>,
) -> Result<(StatusCode, Json<ImportJob>), ApiError> {
    let request = request.normalized();
    request.validate()?;
    let runner = runner(&state)?;
    require_site(&state, site_id).await?;

    let job: ImportJob = ImportJobRepository::new(state.pool.clone())
        .create(
            site_id,
            request.naf_code.as_deref(),
            request.department.as_deref(),
            request.city.as_deref(),
        )
        .await?
        .into();

    info!(
        job_id = job.id,
        site_id = site_id,
        naf_code = ?job.naf_code,
        department = ?job.department,
        city = ?job.city,
        "Import job created"
    );
    runner.spawn_run(job.id);

    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/v1/sites/:site_id/imports
pub async fn list_import_jobs(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
) -> Result<Json<ListImportJobsResponse>, ApiError> {
    require_site(&state, site_id).await?;

    let jobs: Vec<ImportJob> = ImportJobRepository::new(state.pool.clone())
        .list_for_site(site_id)
        .await?
        .into_iter()
        .map(ImportJob::from)
        .collect();

    let total = jobs.len();
    Ok(Json(ListImportJobsResponse { jobs, total }))
}

/// GET /api/v1/sites/:site_id/imports/:job_id
pub async fn get_import_job(
    State(state): State<AppState>,
    Path((site_id, job_id)): Path<(i64, i64)>,
) -> Result<Json<ImportJob>, ApiError> {
    Ok(Json(require_job(&state, site_id, job_id).await?))
}

/// POST /api/v1/sites/:site_id/imports/:job_id/resume
///
/// Only `failed` jobs and `running` jobs left behind by a restart can be
/// resumed. The job continues from its stored cursor with its counters intact.
pub async fn resume_import_job(
    State(state): State<AppState>,
    Path((site_id, job_id)): Path<(i64, i64)>,
) -> Result<(StatusCode, Json<ImportJob>), ApiError> {
    let runner = runner(&state)?;
    let job = require_job(&state, site_id, job_id).await?;

    if !job.status.is_resumable() {
        return Err(ApiError::Conflict(format!(
            "Import job {} is {} and cannot be resumed",
            job.id, job.status
        )));
    }
    if runner.is_active(job.id) {
        return Err(ApiError::Conflict(format!(
            "Import job {} is already running",
            job.id
        )));
    }

    info!(job_id = job.id, site_id = site_id, status = %job.status, "Import job resume requested");
    runner.spawn_resume(job.id);

    Ok((StatusCode::ACCEPTED, Json(job)))
}
