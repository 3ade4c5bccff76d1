//! PostgreSQL implementation of the import pipeline's store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{
    Establishment, EstablishmentDraft, ImportCheckpoint, ImportJob, ImportJobStatus, Site,
};
use domain::services::{ImportStore, StoreError};
use sqlx::PgPool;

use crate::repositories::{EstablishmentRepository, ImportJobRepository, SiteRepository};

/// Postgres unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

/// [`ImportStore`] over a connection pool. Every call commits on its own.
#[derive(Clone)]
pub struct PgImportStore {
    sites: SiteRepository,
    jobs: ImportJobRepository,
    establishments: EstablishmentRepository,
}

impl PgImportStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            sites: SiteRepository::new(pool.clone()),
            jobs: ImportJobRepository::new(pool.clone()),
            establishments: EstablishmentRepository::new(pool),
        }
    }
}

/// Map a database error, keeping uniqueness violations distinguishable.
pub fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(db_err.message().to_string())
        }
        _ => StoreError::Database(err.to_string()),
    }
}

#[async_trait]
impl ImportStore for PgImportStore {
    async fn find_site(&self, site_id: i64) -> Result<Option<Site>, StoreError> {
        let site = self.sites.find_by_id(site_id).await.map_err(store_error)?;
        Ok(site.map(Into::into))
    }

    async fn find_job(&self, job_id: i64) -> Result<Option<ImportJob>, StoreError> {
        let job = self.jobs.find_by_id(job_id).await.map_err(store_error)?;
        Ok(job.map(Into::into))
    }

    async fn save_job_status(
        &self,
        job_id: i64,
        status: ImportJobStatus,
        last_error: Option<&str>,
    ) -> Result<ImportJob, StoreError> {
        self.jobs
            .update_status(job_id, status, last_error)
            .await
            .map_err(store_error)?
            .map(Into::into)
            .ok_or_else(|| StoreError::NotFound(format!("Import job {}", job_id)))
    }

    async fn claim_job(
        &self,
        job_id: i64,
        from: &[ImportJobStatus],
    ) -> Result<Option<ImportJob>, StoreError> {
        let job = self.jobs.claim(job_id, from).await.map_err(store_error)?;
        Ok(job.map(Into::into))
    }

    async fn complete_job(
        &self,
        job_id: i64,
        checkpoint: &ImportCheckpoint,
    ) -> Result<ImportJob, StoreError> {
        self.jobs
            .complete(job_id, checkpoint)
            .await
            .map_err(store_error)?
            .map(Into::into)
            .ok_or_else(|| StoreError::NotFound(format!("Import job {}", job_id)))
    }

    async fn checkpoint_job(
        &self,
        job_id: i64,
        checkpoint: &ImportCheckpoint,
    ) -> Result<(), StoreError> {
        let updated = self
            .jobs
            .checkpoint(job_id, checkpoint)
            .await
            .map_err(store_error)?;
        if updated {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("Import job {}", job_id)))
        }
    }

    async fn find_establishment(
        &self,
        site_id: i64,
        siret: &str,
    ) -> Result<Option<Establishment>, StoreError> {
        let row = self
            .establishments
            .find_by_siret(site_id, siret)
            .await
            .map_err(store_error)?;
        Ok(row.map(Into::into))
    }

    async fn insert_establishment(
        &self,
        site_id: i64,
        draft: &EstablishmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Establishment, StoreError> {
        let row = self
            .establishments
            .insert(site_id, draft, now)
            .await
            .map_err(store_error)?;
        Ok(row.into())
    }

    async fn update_establishment(
        &self,
        establishment_id: i64,
        draft: &EstablishmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Establishment, StoreError> {
        self.establishments
            .update(establishment_id, draft, now)
            .await
            .map_err(store_error)?
            .map(Into::into)
            .ok_or_else(|| StoreError::NotFound(format!("Establishment {}", establishment_id)))
    }
}
