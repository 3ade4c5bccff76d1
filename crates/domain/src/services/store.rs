//! Persistence port of the import pipeline.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    CreateImportJobRequest, Establishment, EstablishmentDraft, ImportCheckpoint, ImportJob,
    ImportJobStatus, Site,
};

/// Errors raised by an [`ImportStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Storage operations the import pipeline needs.
///
/// Every method commits on its own. `checkpoint_job` writes the cursor and
/// all counters in a single statement, and `complete_job` does the same
/// together with the final status.
#[async_trait::async_trait]
pub trait ImportStore: Send + Sync {
    async fn find_site(&self, site_id: i64) -> Result<Option<Site>, StoreError>;

    async fn find_job(&self, job_id: i64) -> Result<Option<ImportJob>, StoreError>;

    /// Set the job status and bump `updated_at`. `last_error` replaces the
    /// stored message when given and leaves it untouched otherwise.
    async fn save_job_status(
        &self,
        job_id: i64,
        status: ImportJobStatus,
        last_error: Option<&str>,
    ) -> Result<ImportJob, StoreError>;

    /// Atomically move a job whose status is one of `from` to `running`.
    /// Returns `None` when the job is missing or in any other status.
    async fn claim_job(
        &self,
        job_id: i64,
        from: &[ImportJobStatus],
    ) -> Result<Option<ImportJob>, StoreError>;

    /// Persist cursor, counters, last error and `updated_at` together.
    async fn checkpoint_job(
        &self,
        job_id: i64,
        checkpoint: &ImportCheckpoint,
    ) -> Result<(), StoreError>;

    /// Persist the last checkpoint and the `completed` status together.
    async fn complete_job(
        &self,
        job_id: i64,
        checkpoint: &ImportCheckpoint,
    ) -> Result<ImportJob, StoreError>;

    async fn find_establishment(
        &self,
        site_id: i64,
        siret: &str,
    ) -> Result<Option<Establishment>, StoreError>;

    async fn insert_establishment(
        &self,
        site_id: i64,
        draft: &EstablishmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Establishment, StoreError>;

    /// Overwrite the mutable fields of an existing establishment.
    async fn update_establishment(
        &self,
        establishment_id: i64,
        draft: &EstablishmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Establishment, StoreError>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    sites: BTreeMap<i64, Site>,
    jobs: BTreeMap<i64, ImportJob>,
    establishments: BTreeMap<i64, Establishment>,
    rejected_sirets: HashSet<String>,
    fail_completions: bool,
    next_job_id: i64,
    next_establishment_id: i64,
}

/// In-memory store for development and testing.
#[derive(Debug, Default)]
pub struct InMemoryImportStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryImportStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, InMemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Database("in-memory store lock poisoned".to_string()))
    }

    pub fn add_site(&self, site: Site) -> Result<(), StoreError> {
        self.state()?.sites.insert(site.id, site);
        Ok(())
    }

    /// Create a `pending` job for a site.
    pub fn create_job(
        &self,
        site_id: i64,
        request: CreateImportJobRequest,
    ) -> Result<ImportJob, StoreError> {
        let mut state = self.state()?;
        state.next_job_id += 1;
        let now = Utc::now();
        let job = ImportJob {
            id: state.next_job_id,
            site_id,
            naf_code: request.naf_code,
            department: request.department,
            city: request.city,
            status: ImportJobStatus::Pending,
            created_at: now,
            updated_at: now,
            cursor: None,
            total_imported: 0,
            total_closed: 0,
            total_errors: 0,
            last_error: None,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    /// Make inserts of `siret` fail with a conflict.
    pub fn reject_siret(&self, siret: &str) -> Result<(), StoreError> {
        self.state()?.rejected_sirets.insert(siret.to_string());
        Ok(())
    }

    /// Make `complete_job` fail without writing anything.
    pub fn fail_completions(&self, fail: bool) -> Result<(), StoreError> {
        self.state()?.fail_completions = fail;
        Ok(())
    }

    /// Establishments of a site, ordered by id.
    pub fn establishments(&self, site_id: i64) -> Result<Vec<Establishment>, StoreError> {
        Ok(self
            .state()?
            .establishments
            .values()
            .filter(|e| e.site_id == site_id)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ImportStore for InMemoryImportStore {
    async fn find_site(&self, site_id: i64) -> Result<Option<Site>, StoreError> {
        Ok(self.state()?.sites.get(&site_id).cloned())
    }

    async fn find_job(&self, job_id: i64) -> Result<Option<ImportJob>, StoreError> {
        Ok(self.state()?.jobs.get(&job_id).cloned())
    }

    async fn save_job_status(
        &self,
        job_id: i64,
        status: ImportJobStatus,
        last_error: Option<&str>,
    ) -> Result<ImportJob, StoreError> {
        let mut state = self.state()?;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("Import job {}", job_id)))?;
        job.status = status;
        if let Some(message) = last_error {
            job.last_error = Some(message.to_string());
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn claim_job(
        &self,
        job_id: i64,
        from: &[ImportJobStatus],
    ) -> Result<Option<ImportJob>, StoreError> {
        let mut state = self.state()?;
        match state.jobs.get_mut(&job_id) {
            Some(job) if from.contains(&job.status) => {
                job.status = ImportJobStatus::Running;
                job.updated_at = Utc::now();
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn checkpoint_job(
        &self,
        job_id: i64,
        checkpoint: &ImportCheckpoint,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("Import job {}", job_id)))?;
        job.apply_checkpoint(checkpoint);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_job(
        &self,
        job_id: i64,
        checkpoint: &ImportCheckpoint,
    ) -> Result<ImportJob, StoreError> {
        let mut state = self.state()?;
        if state.fail_completions {
            return Err(StoreError::Database("connection lost".to_string()));
        }
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("Import job {}", job_id)))?;
        job.apply_checkpoint(checkpoint);
        job.status = ImportJobStatus::Completed;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn find_establishment(
        &self,
        site_id: i64,
        siret: &str,
    ) -> Result<Option<Establishment>, StoreError> {
        Ok(self
            .state()?
            .establishments
            .values()
            .find(|e| e.site_id == site_id && e.siret == siret)
            .cloned())
    }

    async fn insert_establishment(
        &self,
        site_id: i64,
        draft: &EstablishmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Establishment, StoreError> {
        let mut state = self.state()?;
        let duplicate = state
            .establishments
            .values()
            .any(|e| e.site_id == site_id && e.siret == draft.siret);
        if duplicate || state.rejected_sirets.contains(&draft.siret) {
            return Err(StoreError::Conflict(format!(
                "Establishment {} already exists for site {}",
                draft.siret, site_id
            )));
        }

        state.next_establishment_id += 1;
        let establishment =
            Establishment::from_draft(state.next_establishment_id, site_id, draft, now);
        state
            .establishments
            .insert(establishment.id, establishment.clone());
        Ok(establishment)
    }

    async fn update_establishment(
        &self,
        establishment_id: i64,
        draft: &EstablishmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Establishment, StoreError> {
        let mut state = self.state()?;
        let establishment = state
            .establishments
            .get_mut(&establishment_id)
            .ok_or_else(|| StoreError::NotFound(format!("Establishment {}", establishment_id)))?;
        establishment.apply_draft(draft, now);
        Ok(establishment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_job_status_keeps_error_unless_replaced() {
        let store = InMemoryImportStore::new();
        let job = store.create_job(1, CreateImportJobRequest::default()).unwrap();

        store
            .save_job_status(job.id, ImportJobStatus::Failed, Some("boom"))
            .await
            .unwrap();
        let job = store
            .save_job_status(job.id, ImportJobStatus::Running, None)
            .await
            .unwrap();

        assert_eq!(job.status, ImportJobStatus::Running);
        assert_eq!(job.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_claim_only_from_listed_statuses() {
        let store = InMemoryImportStore::new();
        let job = store.create_job(1, CreateImportJobRequest::default()).unwrap();

        let claimed = store
            .claim_job(job.id, &[ImportJobStatus::Pending])
            .await
            .unwrap();
        assert_eq!(claimed.unwrap().status, ImportJobStatus::Running);

        let again = store
            .claim_job(job.id, &[ImportJobStatus::Pending])
            .await
            .unwrap();
        assert!(again.is_none());
        assert!(store
            .claim_job(42, &[ImportJobStatus::Pending])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_complete_writes_checkpoint_and_status() {
        let store = InMemoryImportStore::new();
        let job = store.create_job(1, CreateImportJobRequest::default()).unwrap();
        let checkpoint = ImportCheckpoint {
            total_imported: 3,
            total_closed: 1,
            ..Default::default()
        };

        let job = store.complete_job(job.id, &checkpoint).await.unwrap();

        assert_eq!(job.status, ImportJobStatus::Completed);
        assert_eq!(job.checkpoint(), checkpoint);
    }

    #[tokio::test]
    async fn test_missing_job_is_not_found() {
        let store = InMemoryImportStore::new();
        let result = store
            .checkpoint_job(42, &ImportCheckpoint::default())
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
