//! Import job entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::ImportJobStatus;
use sqlx::FromRow;

/// Database row mapping for the import_jobs table.
#[derive(Debug, Clone, FromRow)]
pub struct ImportJobEntity {
    pub id: i64,
    pub site_id: i64,
    pub naf_code: Option<String>,
    pub department: Option<String>,
    pub city: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cursor: Option<String>,
    pub total_imported: i64,
    pub total_closed: i64,
    pub total_errors: i64,
    pub last_error: Option<String>,
}

impl From<ImportJobEntity> for domain::models::ImportJob {
    fn from(entity: ImportJobEntity) -> Self {
        // The column CHECK only admits known statuses.
        let status = entity
            .status
            .parse()
            .unwrap_or(ImportJobStatus::Failed);
        Self {
            id: entity.id,
            site_id: entity.site_id,
            naf_code: entity.naf_code,
            department: entity.department,
            city: entity.city,
            status,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
            cursor: entity.cursor,
            total_imported: entity.total_imported,
            total_closed: entity.total_closed,
            total_errors: entity.total_errors,
            last_error: entity.last_error,
        }
    }
}
