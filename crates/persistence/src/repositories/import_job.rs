//! Import job repository for database operations.

use domain::models::{ImportCheckpoint, ImportJobStatus};
use sqlx::PgPool;

use crate::entities::ImportJobEntity;
use crate::metrics::QueryTimer;

const JOB_COLUMNS: &str = "id, site_id, naf_code, department, city, status, created_at, \
                           updated_at, cursor, total_imported, total_closed, total_errors, last_error";

/// Repository for import job database operations.
#[derive(Clone)]
pub struct ImportJobRepository {
    pool: PgPool,
}

impl ImportJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a `pending` job for a site.
    pub async fn create(
        &self,
        site_id: i64,
        naf_code: Option<&str>,
        department: Option<&str>,
        city: Option<&str>,
    ) -> Result<ImportJobEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_import_job");
        let result = sqlx::query_as::<_, ImportJobEntity>(&format!(
            r#"
            INSERT INTO import_jobs (site_id, naf_code, department, city, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(site_id)
        .bind(naf_code)
        .bind(department)
        .bind(city)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    pub async fn find_by_id(&self, job_id: i64) -> Result<Option<ImportJobEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_import_job_by_id");
        let result = sqlx::query_as::<_, ImportJobEntity>(&format!(
            "SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Find a job only if it belongs to the given site.
    pub async fn find_for_site(
        &self,
        site_id: i64,
        job_id: i64,
    ) -> Result<Option<ImportJobEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_import_job_for_site");
        let result = sqlx::query_as::<_, ImportJobEntity>(&format!(
            "SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = $1 AND site_id = $2"
        ))
        .bind(job_id)
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Jobs of a site, newest first.
    pub async fn list_for_site(&self, site_id: i64) -> Result<Vec<ImportJobEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_import_jobs_for_site");
        let result = sqlx::query_as::<_, ImportJobEntity>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM import_jobs
            WHERE site_id = $1
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(site_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Set the status, replacing `last_error` only when one is given.
    pub async fn update_status(
        &self,
        job_id: i64,
        status: ImportJobStatus,
        last_error: Option<&str>,
    ) -> Result<Option<ImportJobEntity>, sqlx::Error> {
        let timer = QueryTimer::new("update_import_job_status");
        let result = sqlx::query_as::<_, ImportJobEntity>(&format!(
            r#"
            UPDATE import_jobs
            SET status = $2, last_error = COALESCE($3, last_error), updated_at = NOW()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(status.as_str())
        .bind(last_error)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Switch a job to `running` only if its current status is one of `from`.
    ///
    /// Returns `None` when the job does not exist or is in another status, so
    /// concurrent callers cannot both start the same job.
    pub async fn claim(
        &self,
        job_id: i64,
        from: &[ImportJobStatus],
    ) -> Result<Option<ImportJobEntity>, sqlx::Error> {
        let timer = QueryTimer::new("claim_import_job");
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query_as::<_, ImportJobEntity>(&format!(
            r#"
            UPDATE import_jobs
            SET status = 'running', updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(from)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Write the resume checkpoint in one statement.
    pub async fn checkpoint(
        &self,
        job_id: i64,
        checkpoint: &ImportCheckpoint,
    ) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("checkpoint_import_job");
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET cursor = $2, total_imported = $3, total_closed = $4, total_errors = $5,
                last_error = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(checkpoint.cursor.as_deref())
        .bind(checkpoint.total_imported)
        .bind(checkpoint.total_closed)
        .bind(checkpoint.total_errors)
        .bind(checkpoint.last_error.as_deref())
        .execute(&self.pool)
        .await;
        timer.record();
        result.map(|r| r.rows_affected() > 0)
    }

    /// Write the final checkpoint and mark the job `completed` in one statement.
    pub async fn complete(
        &self,
        job_id: i64,
        checkpoint: &ImportCheckpoint,
    ) -> Result<Option<ImportJobEntity>, sqlx::Error> {
        let timer = QueryTimer::new("complete_import_job");
        let result = sqlx::query_as::<_, ImportJobEntity>(&format!(
            r#"
            UPDATE import_jobs
            SET status = 'completed', cursor = $2, total_imported = $3, total_closed = $4,
                total_errors = $5, last_error = $6, updated_at = NOW()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(checkpoint.cursor.as_deref())
        .bind(checkpoint.total_imported)
        .bind(checkpoint.total_closed)
        .bind(checkpoint.total_errors)
        .bind(checkpoint.last_error.as_deref())
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }
}
