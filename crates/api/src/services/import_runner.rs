//! Background execution of import jobs.
//!
//! Requests only create or select a job; the orchestrator runs on its own
//! tokio task so the HTTP response does not wait for the registry.

use std::sync::Arc;

use domain::models::ImportJob;
use domain::services::{ImportError, ImportOrchestrator, ImportStore, RegistrySource};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::middleware::metrics::{record_import_job, record_import_records};
use crate::services::geocoding::GeocodingService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Start,
    Resume,
}

/// Spawns orchestrator runs and the geocoding sweep that follows them.
#[derive(Clone)]
pub struct ImportRunner {
    orchestrator: ImportOrchestrator,
    store: Arc<dyn ImportStore>,
    geocoding: Option<GeocodingService>,
}

impl ImportRunner {
    pub fn new(
        store: Arc<dyn ImportStore>,
        registry: Arc<dyn RegistrySource>,
        geocoding: Option<GeocodingService>,
    ) -> Self {
        Self {
            orchestrator: ImportOrchestrator::new(store.clone(), registry),
            store,
            geocoding,
        }
    }

    /// Whether a run of `job_id` is executing in this process.
    pub fn is_active(&self, job_id: i64) -> bool {
        self.orchestrator.is_active(job_id)
    }

    /// Run a `pending` job in the background.
    pub fn spawn_run(&self, job_id: i64) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.drive(job_id, RunMode::Start).await })
    }

    /// Resume a `failed` or stale `running` job in the background.
    pub fn spawn_resume(&self, job_id: i64) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.drive(job_id, RunMode::Resume).await })
    }

    async fn drive(&self, job_id: i64, mode: RunMode) {
        let before = match self.store.find_job(job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = job_id, error = %e, "Could not load import job");
                return;
            }
        };

        let result = match mode {
            RunMode::Start => self.orchestrator.run(job_id).await,
            RunMode::Resume => self.orchestrator.resume(job_id).await,
        };

        match result {
            Ok(job) => {
                record_counter_deltas(before.as_ref(), &job);
                record_import_job("completed");
                info!(
                    job_id = job.id,
                    site_id = job.site_id,
                    total_imported = job.total_imported,
                    total_closed = job.total_closed,
                    total_errors = job.total_errors,
                    "Import job completed"
                );
                self.geocode_site(job.site_id).await;
            }
            Err(e @ ImportError::InvalidTransition { .. }) => {
                warn!(job_id = job_id, error = %e, "Import job not started");
            }
            Err(e) => {
                record_import_job("failed");
                if let Ok(Some(job)) = self.store.find_job(job_id).await {
                    record_counter_deltas(before.as_ref(), &job);
                }
                error!(job_id = job_id, error = %e, "Import job failed");
            }
        }
    }

    async fn geocode_site(&self, site_id: i64) {
        let Some(geocoding) = &self.geocoding else {
            return;
        };
        if let Err(e) = geocoding.sweep_site(site_id).await {
            error!(site_id = site_id, error = %e, "Geocoding after import failed");
        }
    }
}

/// Counter growth between the job as loaded and as finished.
fn record_counter_deltas(before: Option<&ImportJob>, after: &ImportJob) {
    let delta = |after: i64, before: Option<i64>| (after - before.unwrap_or(0)).max(0) as u64;
    record_import_records(
        delta(after.total_imported, before.map(|j| j.total_imported)),
        delta(after.total_closed, before.map(|j| j.total_closed)),
        delta(after.total_errors, before.map(|j| j.total_errors)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::models::{CreateImportJobRequest, ImportJobStatus, RegistryFilters, Site};
    use domain::services::{InMemoryImportStore, MockRegistrySource, RegistryError};
    use serde_json::json;

    fn site() -> Site {
        Site {
            id: 1,
            name: "Développeurs".to_string(),
            slug: "developpeurs".to_string(),
            description: None,
            sirene_filters: RegistryFilters::from([(
                "codeNaf".to_string(),
                "62.01Z".to_string(),
            )]),
            created_at: Utc::now(),
        }
    }

    fn store_with_job() -> (Arc<InMemoryImportStore>, i64) {
        let store = Arc::new(InMemoryImportStore::new());
        store.add_site(site()).unwrap();
        let job = store
            .create_job(1, CreateImportJobRequest::default())
            .unwrap();
        (store, job.id)
    }

    #[tokio::test]
    async fn test_spawn_run_completes_job() {
        let (store, job_id) = store_with_job();
        let registry = Arc::new(MockRegistrySource::new().with_page(
            vec![
                json!({"siret": "73282932000074", "etatAdministratifEtablissement": "A"}),
                json!({"siret": "55203253400646", "etatAdministratifEtablissement": "F"}),
            ],
            None,
        ));
        let runner = ImportRunner::new(store.clone(), registry, None);

        runner.spawn_run(job_id).await.unwrap();

        let job = store.find_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, ImportJobStatus::Completed);
        assert_eq!(job.total_imported, 2);
        assert_eq!(job.total_closed, 1);
    }

    #[tokio::test]
    async fn test_spawn_run_records_failure() {
        let (store, job_id) = store_with_job();
        let registry = Arc::new(
            MockRegistrySource::new().with_error(RegistryError::Status {
                status: 401,
                body: "invalid token".to_string(),
            }),
        );
        let runner = ImportRunner::new(store.clone(), registry, None);

        runner.spawn_run(job_id).await.unwrap();

        let job = store.find_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, ImportJobStatus::Failed);
        assert!(job.last_error.unwrap().contains("401"));
    }

    #[tokio::test]
    async fn test_spawn_resume_continues_failed_job() {
        let (store, job_id) = store_with_job();
        let registry = Arc::new(
            MockRegistrySource::new()
                .with_page(vec![json!({"siret": "73282932000074"})], Some("page-2"))
                .with_error(RegistryError::Http("connection reset".to_string())),
        );
        let runner = ImportRunner::new(store.clone(), registry.clone(), None);
        runner.spawn_run(job_id).await.unwrap();
        assert_eq!(
            store.find_job(job_id).await.unwrap().unwrap().status,
            ImportJobStatus::Failed
        );

        registry.push(Ok(domain::models::RegistryPage {
            records: vec![json!({"siret": "55203253400646"})],
            next_cursor: None,
        }));
        runner.spawn_resume(job_id).await.unwrap();

        let job = store.find_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, ImportJobStatus::Completed);
        assert_eq!(job.total_imported, 2);
        assert_eq!(
            registry.requested_cursors(),
            vec!["*".to_string(), "page-2".to_string(), "page-2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_completed_job_is_not_rerun() {
        let (store, job_id) = store_with_job();
        let registry = Arc::new(MockRegistrySource::new());
        let runner = ImportRunner::new(store.clone(), registry.clone(), None);
        runner.spawn_run(job_id).await.unwrap();
        let calls = registry.requested_cursors().len();

        runner.spawn_run(job_id).await.unwrap();

        assert_eq!(registry.requested_cursors().len(), calls);
        assert_eq!(
            store.find_job(job_id).await.unwrap().unwrap().status,
            ImportJobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_duplicate_resume_runs_once() {
        let (store, job_id) = store_with_job();
        let registry = Arc::new(
            MockRegistrySource::new()
                .with_page(vec![json!({"siret": "73282932000074"})], Some("page-2"))
                .with_error(RegistryError::Http("connection reset".to_string())),
        );
        let runner = ImportRunner::new(store.clone(), registry.clone(), None);
        runner.spawn_run(job_id).await.unwrap();

        registry.push(Ok(domain::models::RegistryPage {
            records: vec![json!({
                "siret": "55203253400646",
                "etatAdministratifEtablissement": "F"
            })],
            next_cursor: None,
        }));
        let first = runner.spawn_resume(job_id);
        let second = runner.spawn_resume(job_id);
        first.await.unwrap();
        second.await.unwrap();

        let job = store.find_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, ImportJobStatus::Completed);
        assert_eq!(job.total_closed, 1);
        assert_eq!(registry.requested_cursors().len(), 3);
        assert!(!runner.is_active(job_id));
    }
}
