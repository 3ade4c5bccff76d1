//! Import job orchestration.
//!
//! Drives a job through `pending -> running -> completed | failed`, pulling
//! registry pages, reconciling each record and checkpointing after every
//! page so an interrupted job can be resumed from its stored cursor.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::{ImportJob, ImportJobStatus};
use crate::services::filters::build_import_filters;
use crate::services::reconciler::reconcile_record;
use crate::services::registry::{RegistryError, RegistryPager, RegistrySource};
use crate::services::store::{ImportStore, StoreError};

/// Job-fatal errors. The job is marked failed before they are returned.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Site {0} not found")]
    SiteNotFound(i64),

    #[error("Import job {0} not found")]
    JobNotFound(i64),

    #[error("Import job {job_id} cannot be {action} while {status}")]
    InvalidTransition {
        job_id: i64,
        status: ImportJobStatus,
        action: &'static str,
    },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Runs import jobs against a store and a registry.
///
/// Clones share the set of jobs currently executing, so one orchestrator
/// never drives the same job twice at once.
#[derive(Clone)]
pub struct ImportOrchestrator {
    store: Arc<dyn ImportStore>,
    registry: Arc<dyn RegistrySource>,
    active: Arc<Mutex<HashSet<i64>>>,
}

/// Marks a job as executing until dropped.
struct ActiveJob {
    active: Arc<Mutex<HashSet<i64>>>,
    job_id: i64,
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

impl ImportOrchestrator {
    pub fn new(store: Arc<dyn ImportStore>, registry: Arc<dyn RegistrySource>) -> Self {
        Self {
            store,
            registry,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Whether this orchestrator is currently executing `job_id`.
    pub fn is_active(&self, job_id: i64) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&job_id)
    }

    /// Start a `pending` job and drive it to completion.
    pub async fn run(&self, job_id: i64) -> Result<ImportJob, ImportError> {
        let _active = self.begin(job_id, "started")?;
        let job = self.claim(job_id, &[ImportJobStatus::Pending], "started").await?;
        self.execute(job).await
    }

    /// Continue a `failed` or interrupted `running` job from its stored
    /// cursor, keeping its counters.
    pub async fn resume(&self, job_id: i64) -> Result<ImportJob, ImportError> {
        let _active = self.begin(job_id, "resumed")?;
        let job = self
            .claim(job_id, &ImportJobStatus::RESUMABLE, "resumed")
            .await?;
        info!(
            job_id = job.id,
            cursor = job.cursor.as_deref().unwrap_or("*"),
            "Resuming import job"
        );
        self.execute(job).await
    }

    fn begin(&self, job_id: i64, action: &'static str) -> Result<ActiveJob, ImportError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(job_id) {
            return Err(ImportError::InvalidTransition {
                job_id,
                status: ImportJobStatus::Running,
                action,
            });
        }
        Ok(ActiveJob {
            active: self.active.clone(),
            job_id,
        })
    }

    /// Move the job to `running` in one store call, or explain why not.
    async fn claim(
        &self,
        job_id: i64,
        from: &[ImportJobStatus],
        action: &'static str,
    ) -> Result<ImportJob, ImportError> {
        if let Some(job) = self.store.claim_job(job_id, from).await? {
            return Ok(job);
        }
        let job = self.load_job(job_id).await?;
        Err(ImportError::InvalidTransition {
            job_id,
            status: job.status,
            action,
        })
    }

    async fn load_job(&self, job_id: i64) -> Result<ImportJob, ImportError> {
        self.store
            .find_job(job_id)
            .await?
            .ok_or(ImportError::JobNotFound(job_id))
    }

    async fn execute(&self, job: ImportJob) -> Result<ImportJob, ImportError> {
        let site = match self.store.find_site(job.site_id).await {
            Ok(Some(site)) => site,
            Ok(None) => return Err(self.fail(job.id, ImportError::SiteNotFound(job.site_id)).await),
            Err(e) => return Err(self.fail(job.id, e.into()).await),
        };

        let filters = build_import_filters(&site, &job);

        info!(
            job_id = job.id,
            site_id = site.id,
            filters = ?filters,
            "Import job running"
        );

        let mut checkpoint = job.checkpoint();
        let mut pager = RegistryPager::new(self.registry.as_ref(), filters, job.cursor.as_deref());
        let mut pages: u64 = 0;

        while let Some(page) = pager.next_page().await {
            let page = match page {
                Ok(page) => page,
                Err(e) => return Err(self.fail(job.id, e.into()).await),
            };
            pages += 1;

            let errors_before = checkpoint.total_errors;
            for record in &page.records {
                match reconcile_record(self.store.as_ref(), site.id, record, Utc::now()).await {
                    Ok(outcome) => {
                        checkpoint.total_imported += i64::from(outcome.created);
                        checkpoint.total_closed += i64::from(outcome.closed);
                    }
                    Err(e) => {
                        warn!(job_id = job.id, error = %e, "Skipping registry record");
                        checkpoint.total_errors += 1;
                        checkpoint.last_error = Some(e.to_string());
                    }
                }
            }

            checkpoint.cursor = page.next_cursor.clone();
            if pager.is_finished() {
                // Written together with the completed status below.
                break;
            }
            if let Err(e) = self.store.checkpoint_job(job.id, &checkpoint).await {
                return Err(self.fail(job.id, e.into()).await);
            }

            debug!(
                job_id = job.id,
                page = pages,
                records = page.records.len(),
                page_errors = checkpoint.total_errors - errors_before,
                next_cursor = ?checkpoint.cursor,
                "Import page committed"
            );
        }

        let job = match self.store.complete_job(job.id, &checkpoint).await {
            Ok(job) => job,
            Err(e) => return Err(self.fail(job.id, e.into()).await),
        };

        info!(
            job_id = job.id,
            pages = pages,
            total_imported = job.total_imported,
            total_closed = job.total_closed,
            total_errors = job.total_errors,
            "Import job completed"
        );

        Ok(job)
    }

    /// Persist the failure, then hand the error back for propagation.
    async fn fail(&self, job_id: i64, err: ImportError) -> ImportError {
        error!(job_id = job_id, error = %err, "Import job failed");
        if let Err(store_err) = self
            .store
            .save_job_status(job_id, ImportJobStatus::Failed, Some(&err.to_string()))
            .await
        {
            error!(
                job_id = job_id,
                error = %store_err,
                "Failed to record import job failure"
            );
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateImportJobRequest, RegistryFilters, Site};
    use crate::services::registry::MockRegistrySource;
    use crate::services::store::InMemoryImportStore;
    use serde_json::{json, Value};

    fn site(filters: &[(&str, &str)]) -> Site {
        Site {
            id: 1,
            name: "Développeurs".to_string(),
            slug: "developpeurs".to_string(),
            description: None,
            sirene_filters: filters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<RegistryFilters>(),
            created_at: Utc::now(),
        }
    }

    fn record(n: u32, state: &str) -> Value {
        json!({
            "siret": format!("732829320{:05}", n),
            "etatAdministratifEtablissement": state,
            "uniteLegale": {"denominationUniteLegale": format!("ENTREPRISE {}", n)},
            "periodesEtablissement": [{"codePostalEtablissement": "75002"}]
        })
    }

    fn setup(site_filters: &[(&str, &str)]) -> (Arc<InMemoryImportStore>, ImportJob) {
        let store = Arc::new(InMemoryImportStore::new());
        store.add_site(site(site_filters)).unwrap();
        let job = store.create_job(1, CreateImportJobRequest::default()).unwrap();
        (store, job)
    }

    fn orchestrator(
        store: &Arc<InMemoryImportStore>,
        registry: &Arc<MockRegistrySource>,
    ) -> ImportOrchestrator {
        ImportOrchestrator::new(store.clone(), registry.clone())
    }

    #[tokio::test]
    async fn test_two_pages_complete() {
        let (store, job) = setup(&[]);
        let registry = Arc::new(
            MockRegistrySource::new()
                .with_page(vec![record(1, "A"), record(2, "F")], Some("c1"))
                .with_page(vec![record(3, "A")], None),
        );

        let job = orchestrator(&store, &registry).run(job.id).await.unwrap();

        assert_eq!(job.status, ImportJobStatus::Completed);
        assert_eq!(job.total_imported, 3);
        assert_eq!(job.total_closed, 1);
        assert_eq!(job.total_errors, 0);
        assert_eq!(job.cursor, None);
        assert_eq!(registry.requested_cursors(), vec!["*", "c1"]);
        assert_eq!(store.establishments(1).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_siret_records_are_counted() {
        let (store, job) = setup(&[]);
        let registry = Arc::new(MockRegistrySource::new().with_page(
            vec![
                record(1, "A"),
                json!({"siret": null}),
                record(2, "F"),
                json!({"etatAdministratifEtablissement": "A"}),
            ],
            None,
        ));

        let job = orchestrator(&store, &registry).run(job.id).await.unwrap();

        assert_eq!(job.status, ImportJobStatus::Completed);
        assert_eq!(job.total_errors, 2);
        assert_eq!(job.total_imported, 2);
        assert_eq!(job.total_closed, 1);
        assert_eq!(job.last_error.as_deref(), Some("SIRET missing from registry record"));
    }

    #[tokio::test]
    async fn test_site_filters_reach_registry() {
        let (store, job) = setup(&[("codeNaf", "62.01Z")]);
        let registry = Arc::new(MockRegistrySource::new().with_page(vec![], None));

        orchestrator(&store, &registry).run(job.id).await.unwrap();

        let filters = &registry.requested_filters()[0];
        assert_eq!(filters.get("codeNaf").map(String::as_str), Some("62.01Z"));
        assert_eq!(filters.get("statutDiffusion").map(String::as_str), Some("O"));
        assert_eq!(
            filters.get("etatAdministratifEtablissement").map(String::as_str),
            Some("A,B,F")
        );
    }

    #[tokio::test]
    async fn test_registry_failure_marks_job_failed_and_keeps_checkpoint() {
        let (store, job) = setup(&[]);
        let registry = Arc::new(
            MockRegistrySource::new()
                .with_page(vec![record(1, "A"), record(2, "A")], Some("c1"))
                .with_error(RegistryError::Status {
                    status: 503,
                    body: "maintenance".to_string(),
                }),
        );

        let result = orchestrator(&store, &registry).run(job.id).await;
        assert!(matches!(result, Err(ImportError::Registry(_))));

        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, ImportJobStatus::Failed);
        assert_eq!(job.cursor.as_deref(), Some("c1"));
        assert_eq!(job.total_imported, 2);
        assert!(job.last_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_resume_skips_committed_pages() {
        let (store, job) = setup(&[]);
        let failing = Arc::new(
            MockRegistrySource::new()
                .with_page(vec![record(1, "A"), record(2, "F")], Some("c1"))
                .with_error(RegistryError::Http("connection reset".to_string())),
        );
        assert!(orchestrator(&store, &failing).run(job.id).await.is_err());

        let registry = Arc::new(MockRegistrySource::new().with_page(vec![record(3, "A")], None));
        let job = orchestrator(&store, &registry).resume(job.id).await.unwrap();

        assert_eq!(registry.requested_cursors(), vec!["c1"]);
        assert_eq!(job.status, ImportJobStatus::Completed);
        assert_eq!(job.total_imported, 3);
        assert_eq!(job.total_closed, 1);
        assert_eq!(store.establishments(1).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_interrupted_completion_resumes_from_last_checkpoint() {
        let (store, job) = setup(&[]);
        store.fail_completions(true).unwrap();
        let registry = Arc::new(
            MockRegistrySource::new()
                .with_page(vec![record(1, "A"), record(2, "F")], Some("c1"))
                .with_page(vec![record(3, "F")], None),
        );

        let result = orchestrator(&store, &registry).run(job.id).await;
        assert!(matches!(result, Err(ImportError::Store(_))));

        let failed = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, ImportJobStatus::Failed);
        assert_eq!(failed.cursor.as_deref(), Some("c1"));
        assert_eq!(failed.total_closed, 1);

        store.fail_completions(false).unwrap();
        let registry = Arc::new(MockRegistrySource::new().with_page(vec![record(3, "F")], None));
        let job = orchestrator(&store, &registry).resume(job.id).await.unwrap();

        assert_eq!(registry.requested_cursors(), vec!["c1"]);
        assert_eq!(job.status, ImportJobStatus::Completed);
        assert_eq!(job.cursor, None);
        assert_eq!(job.total_closed, 2);
        // Record 3 was stored before the interruption, so the rerun updates it.
        assert_eq!(job.total_imported, 2);
        assert_eq!(store.establishments(1).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_completed_job_cannot_be_resumed() {
        let (store, job) = setup(&[]);
        let registry = Arc::new(MockRegistrySource::new().with_page(vec![record(1, "F")], None));
        let orchestrator = orchestrator(&store, &registry);
        orchestrator.run(job.id).await.unwrap();

        assert!(matches!(
            orchestrator.resume(job.id).await,
            Err(ImportError::InvalidTransition { status: ImportJobStatus::Completed, .. })
        ));
        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.total_closed, 1);
        assert_eq!(registry.requested_cursors(), vec!["*"]);
    }

    /// Registry that yields to the scheduler before answering.
    struct YieldingRegistry(MockRegistrySource);

    #[async_trait::async_trait]
    impl RegistrySource for YieldingRegistry {
        async fn fetch_page(
            &self,
            filters: &RegistryFilters,
            cursor: &str,
        ) -> Result<crate::models::RegistryPage, RegistryError> {
            tokio::task::yield_now().await;
            self.0.fetch_page(filters, cursor).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_resumes_run_once() {
        let (store, job) = setup(&[]);
        let failing = Arc::new(
            MockRegistrySource::new()
                .with_page(vec![record(1, "A")], Some("c1"))
                .with_error(RegistryError::Http("connection reset".to_string())),
        );
        assert!(orchestrator(&store, &failing).run(job.id).await.is_err());

        let registry = Arc::new(YieldingRegistry(
            MockRegistrySource::new()
                .with_page(vec![record(2, "A")], Some("c2"))
                .with_page(vec![record(3, "A")], None),
        ));
        let orchestrator = ImportOrchestrator::new(store.clone(), registry.clone());

        let (a, b) = tokio::join!(orchestrator.resume(job.id), orchestrator.resume(job.id));

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let rejected = if a.is_err() { a } else { b };
        assert!(matches!(
            rejected,
            Err(ImportError::InvalidTransition { action: "resumed", .. })
        ));
        assert_eq!(registry.0.requested_cursors(), vec!["c1", "c2"]);
        assert!(!orchestrator.is_active(job.id));

        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, ImportJobStatus::Completed);
        assert_eq!(job.total_imported, 3);
    }

    #[tokio::test]
    async fn test_separate_orchestrators_cannot_both_start_a_job() {
        let (store, job) = setup(&[]);
        let first = ImportOrchestrator::new(
            store.clone(),
            Arc::new(YieldingRegistry(MockRegistrySource::new().with_page(vec![], None))),
        );
        let second = ImportOrchestrator::new(
            store.clone(),
            Arc::new(YieldingRegistry(MockRegistrySource::new().with_page(vec![], None))),
        );

        let (a, b) = tokio::join!(first.run(job.id), second.run(job.id));

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_cursor_completes() {
        let (store, job) = setup(&[]);
        let registry = Arc::new(
            MockRegistrySource::new()
                .with_page(vec![record(1, "A")], Some("c1"))
                .with_page(vec![record(2, "A")], Some("c1"))
                .with_page(vec![record(3, "A")], None),
        );

        let job = orchestrator(&store, &registry).run(job.id).await.unwrap();

        assert_eq!(job.status, ImportJobStatus::Completed);
        assert_eq!(job.total_imported, 2);
        assert_eq!(registry.requested_cursors().len(), 2);
    }

    #[tokio::test]
    async fn test_rerun_on_unchanged_data_creates_nothing() {
        let (store, first) = setup(&[]);
        let pages = || {
            Arc::new(MockRegistrySource::new().with_page(vec![record(1, "A"), record(2, "F")], None))
        };
        orchestrator(&store, &pages()).run(first.id).await.unwrap();

        let second = store.create_job(1, CreateImportJobRequest::default()).unwrap();
        let second = orchestrator(&store, &pages()).run(second.id).await.unwrap();

        assert_eq!(second.total_imported, 0);
        assert_eq!(second.total_closed, 1);
        assert_eq!(store.establishments(1).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_site_fails_job() {
        let store = Arc::new(InMemoryImportStore::new());
        let job = store.create_job(99, CreateImportJobRequest::default()).unwrap();
        let registry = Arc::new(MockRegistrySource::new());

        let result = orchestrator(&store, &registry).run(job.id).await;

        assert!(matches!(result, Err(ImportError::SiteNotFound(99))));
        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, ImportJobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("Site 99 not found"));
        assert!(registry.requested_cursors().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let (store, job) = setup(&[]);
        let registry = Arc::new(MockRegistrySource::new());
        let orchestrator = orchestrator(&store, &registry);

        assert!(matches!(
            orchestrator.resume(job.id).await,
            Err(ImportError::InvalidTransition { action: "resumed", .. })
        ));

        orchestrator.run(job.id).await.unwrap();
        assert!(matches!(
            orchestrator.run(job.id).await,
            Err(ImportError::InvalidTransition { status: ImportJobStatus::Completed, .. })
        ));
        assert!(matches!(
            orchestrator.run(404).await,
            Err(ImportError::JobNotFound(404))
        ));
    }
}
